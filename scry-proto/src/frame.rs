//! Frame transport: `type | length | payload` over any byte stream, plus
//! the chunked variant used to move whole capture files.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Maximum accepted frame payload (64 MiB). A peer claiming more than
/// this is corrupt or hostile and the connection is torn down.
pub const MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

/// Chunk size for file transfer frames.
pub const FILE_CHUNK: usize = 1024 * 1024;

/// Writes one frame and flushes it. Any error means the connection is
/// dead; callers must not retry on the same stream.
pub fn send_packet(w: &mut impl Write, ty: i32, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds frame limit"))?;
    w.write_all(&ty.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Reads one full frame. Returns `Ok(None)` when the peer disconnects
/// (cleanly or mid-frame); an oversized length claim is an error so the
/// session can be terminated rather than buffering garbage.
pub fn recv_packet(r: &mut impl Read) -> io::Result<Option<(i32, Vec<u8>)>> {
    let mut header = [0u8; 8];
    if read_or_eof(r, &mut header)?.is_none() {
        return Ok(None);
    }

    let ty = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len > MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame claims {len} byte payload, limit is {MAX_PAYLOAD}"),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    if read_or_eof(r, &mut payload)?.is_none() {
        return Ok(None);
    }
    Ok(Some((ty, payload)))
}

/// `read_exact` that folds EOF into `Ok(None)`.
fn read_or_eof(r: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<()>> {
    match r.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Streams a file as chunked frames of type `ty`: one frame carrying the
/// u64 total size, the data chunks, then an empty terminal frame.
/// `progress` is invoked with fraction complete after each chunk.
pub fn send_file(
    w: &mut impl Write,
    ty: i32,
    path: &Path,
    progress: &mut dyn FnMut(f32),
) -> io::Result<()> {
    let mut file = File::open(path)?;
    let total = file.metadata()?.len();

    send_packet(w, ty, &total.to_le_bytes())?;

    let mut chunk = vec![0u8; FILE_CHUNK];
    let mut sent: u64 = 0;
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        send_packet(w, ty, &chunk[..n])?;
        sent += n as u64;
        progress(fraction(sent, total));
    }

    send_packet(w, ty, &[])
}

/// Receives a chunked file of type `ty` into `dest`. On any failure the
/// partial destination file is removed before the error is returned.
pub fn recv_file(
    r: &mut impl Read,
    ty: i32,
    dest: &Path,
    progress: &mut dyn FnMut(f32),
) -> io::Result<()> {
    let result = recv_file_inner(r, ty, dest, progress);
    if result.is_err() {
        let _ = std::fs::remove_file(dest);
    }
    result
}

fn recv_file_inner(
    r: &mut impl Read,
    ty: i32,
    dest: &Path,
    progress: &mut dyn FnMut(f32),
) -> io::Result<()> {
    let total = {
        let payload = expect_chunk(r, ty)?;
        if payload.len() != 8 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed file-size frame",
            ));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&payload);
        u64::from_le_bytes(raw)
    };

    let mut file = File::create(dest)?;
    let mut received: u64 = 0;
    loop {
        let chunk = expect_chunk(r, ty)?;
        if chunk.is_empty() {
            break;
        }
        file.write_all(&chunk)?;
        received += chunk.len() as u64;
        progress(fraction(received, total));
    }

    if received != total {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("file transfer ended at {received} of {total} bytes"),
        ));
    }
    file.flush()
}

/// Reads the next frame, requiring it to belong to the in-flight
/// transfer. Disconnect and interleaved foreign frames both abort.
fn expect_chunk(r: &mut impl Read, ty: i32) -> io::Result<Vec<u8>> {
    match recv_packet(r)? {
        Some((got, payload)) if got == ty => Ok(payload),
        Some((got, _)) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected packet type {got} inside file transfer"),
        )),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer disconnected mid-transfer",
        )),
    }
}

#[allow(clippy::cast_precision_loss)]
fn fraction(done: u64, total: u64) -> f32 {
    if total == 0 {
        1.0
    } else {
        (done as f64 / total as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn packet_roundtrip() {
        let mut buf = Vec::new();
        send_packet(&mut buf, 42, b"payload bytes").unwrap();
        send_packet(&mut buf, 7, &[]).unwrap();

        let mut cursor = Cursor::new(&buf);
        let (ty, payload) = recv_packet(&mut cursor).unwrap().unwrap();
        assert_eq!(ty, 42);
        assert_eq!(payload, b"payload bytes");
        let (ty, payload) = recv_packet(&mut cursor).unwrap().unwrap();
        assert_eq!(ty, 7);
        assert!(payload.is_empty());
        assert!(recv_packet(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn disconnect_mid_header_is_clean_eof() {
        let mut cursor = Cursor::new(&[1u8, 0, 0][..]);
        assert!(recv_packet(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&(MAX_PAYLOAD + 1).to_le_bytes());
        let mut cursor = Cursor::new(&buf);
        assert_eq!(
            recv_packet(&mut cursor).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn file_transfer_roundtrip_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("capture.scap");
        let dest = dir.path().join("received.scap");
        // Larger than one chunk so several progress callbacks fire.
        let data: Vec<u8> = (0..FILE_CHUNK * 2 + 7000).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &data).unwrap();

        let mut wire = Vec::new();
        send_file(&mut wire, 3, &src, &mut |_| {}).unwrap();

        let mut fractions = Vec::new();
        let mut cursor = Cursor::new(&wire);
        recv_file(&mut cursor, 3, &dest, &mut |f| fractions.push(f)).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert!(fractions.len() >= 3);
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[test]
    fn interrupted_transfer_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("capture.scap");
        let dest = dir.path().join("received.scap");
        std::fs::write(&src, vec![9u8; FILE_CHUNK + 100]).unwrap();

        let mut wire = Vec::new();
        send_file(&mut wire, 3, &src, &mut |_| {}).unwrap();
        // Drop the terminal marker and half the last chunk.
        wire.truncate(wire.len() - 200);

        let mut cursor = Cursor::new(&wire);
        assert!(recv_file(&mut cursor, 3, &dest, &mut |_| {}).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn foreign_frame_aborts_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("capture.scap");
        let dest = dir.path().join("received.scap");
        std::fs::write(&src, b"abc").unwrap();

        let mut wire = Vec::new();
        send_packet(&mut wire, 3, &3u64.to_le_bytes()).unwrap();
        send_packet(&mut wire, 99, b"abc").unwrap();

        let mut cursor = Cursor::new(&wire);
        assert!(recv_file(&mut cursor, 3, &dest, &mut |_| {}).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn empty_file_transfer_completes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty.scap");
        let dest = dir.path().join("received.scap");
        std::fs::write(&src, b"").unwrap();

        let mut wire = Vec::new();
        send_file(&mut wire, 3, &src, &mut |_| {}).unwrap();
        let mut cursor = Cursor::new(&wire);
        recv_file(&mut cursor, 3, &dest, &mut |_| {}).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"");
    }
}
