//! Length-delimited framing of wire text over async byte streams.

use std::io::{Error as IoError, ErrorKind};

use covenant_wire::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted frame size.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Reads one length-prefixed (u32 LE) wire value from the stream.
pub async fn read_value(input: &mut (impl AsyncRead + Unpin + Send)) -> std::io::Result<Value> {
	let mut len_bytes = [0u8; 4];
	input.read_exact(&mut len_bytes).await?;
	let len = u32::from_le_bytes(len_bytes) as usize;

	if len > MAX_FRAME_LEN {
		return Err(IoError::new(
			ErrorKind::InvalidData,
			format!("frame too large: {len} bytes"),
		));
	}

	let mut buf = vec![0u8; len];
	input.read_exact(&mut buf).await?;

	let text = String::from_utf8(buf)
		.map_err(|e| IoError::new(ErrorKind::InvalidData, e.to_string()))?;
	covenant_wire::parse(&text).map_err(|e| IoError::new(ErrorKind::InvalidData, e.to_string()))
}

/// Writes one length-prefixed (u32 LE) wire value to the stream.
pub async fn write_value(
	output: &mut (impl AsyncWrite + Unpin + Send),
	value: &Value,
) -> std::io::Result<()> {
	let text = covenant_wire::write(value);

	if text.len() > MAX_FRAME_LEN {
		return Err(IoError::new(
			ErrorKind::InvalidData,
			format!("frame too large: {} bytes", text.len()),
		));
	}

	let len_bytes = (text.len() as u32).to_le_bytes();
	output.write_all(&len_bytes).await?;
	output.write_all(text.as_bytes()).await?;
	output.flush().await?;

	Ok(())
}

/// Whether an I/O error means the peer went away rather than misbehaved.
pub fn is_disconnect(err: &IoError) -> bool {
	matches!(
		err.kind(),
		ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset
	)
}
