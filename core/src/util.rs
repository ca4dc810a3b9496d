// Copyright 2021 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Length-prefixed framing over async byte streams.
//!
//! All peerlink protocols frame their messages with an unsigned varint
//! length prefix (base-128 little-endian, MSB continuation, at most 10
//! bytes).

use futures::prelude::*;
use std::io;
use unsigned_varint::encode as varint_encode;

/// Writes an unsigned varint to `io`.
pub async fn write_varint<W>(io: &mut W, value: usize) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = varint_encode::usize_buffer();
    io.write_all(varint_encode::usize(value, &mut buf)).await
}

/// Reads an unsigned varint from `io`, one byte at a time.
pub async fn read_varint<R>(io: &mut R) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 10];
    for i in 0..buf.len() {
        let mut byte = [0u8; 1];
        if io.read(&mut byte).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf[i] = byte[0];
        if byte[0] & 0x80 == 0 {
            let (value, _) = unsigned_varint::decode::usize(&buf[..=i])
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed varint"))?;
            return Ok(value);
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint exceeds 10 bytes"))
}

/// Writes a varint-length-prefixed blob.
pub async fn write_length_prefixed<W>(io: &mut W, data: impl AsRef<[u8]>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = data.as_ref();
    write_varint(io, data.len()).await?;
    io.write_all(data).await
}

/// Reads a varint-length-prefixed blob of at most `max_size` bytes.
pub async fn read_length_prefixed<R>(io: &mut R, max_size: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = read_varint(io).await?;
    if len > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds maximum of {}", len, max_size),
        ));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::io::Cursor;

    #[test]
    fn varint_roundtrip() {
        block_on(async {
            for value in &[0usize, 1, 127, 128, 300, 16384, usize::from(u16::MAX)] {
                let mut buf = Vec::new();
                write_varint(&mut buf, *value).await.unwrap();
                let got = read_varint(&mut Cursor::new(buf)).await.unwrap();
                assert_eq!(got, *value);
            }
        })
    }

    #[test]
    fn length_prefixed_roundtrip() {
        block_on(async {
            let mut buf = Vec::new();
            write_length_prefixed(&mut buf, b"hello").await.unwrap();
            let got = read_length_prefixed(&mut Cursor::new(buf), 64).await.unwrap();
            assert_eq!(got, b"hello");
        })
    }

    #[test]
    fn oversized_frame_is_rejected() {
        block_on(async {
            let mut buf = Vec::new();
            write_length_prefixed(&mut buf, vec![0u8; 100]).await.unwrap();
            let err = read_length_prefixed(&mut Cursor::new(buf), 10).await.unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        })
    }
}
