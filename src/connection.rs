use anyhow::Result;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;
use crate::http_object::HttpResponse;

/// Server side of one accepted TCP connection.
pub struct ConnectionOwner {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl ConnectionOwner {

    pub fn with(tcp_stream: TcpStream) -> Self {
        // A TcpStream can't be owned by both the reader and the writer, so split it.
        let (read_half, write_half) = tcp_stream.into_split();

        let reader = BufReader::new(read_half);
        let writer = BufWriter::new(write_half);
        Self { reader, writer }
    }

    pub fn reader(&mut self) -> &mut BufReader<OwnedReadHalf> {
        &mut self.reader
    }

    pub async fn response(&mut self, res: &HttpResponse, close: bool) -> Result<()> {
        let bytes = res.encode(close);
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flushes a partial response and tears the stream down before the declared length
    /// is satisfied. The peer sees EOF mid-body.
    pub async fn sever(mut self, res: &HttpResponse) -> Result<()> {
        let bytes = res.encode(false);
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        debug!("stream severed after {} bytes", bytes.len());
        // Both halves drop here, closing the socket.
        Ok(())
    }
}
