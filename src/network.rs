//! Sending simulation files to a remote run server.
//!
//! The client writes the number of files as a little-endian `u32`, then for each file its
//! name (`u32` length and UTF-8 bytes) and contents (`u64` length and bytes). The server
//! answers with newline-delimited status lines and closes the connection when done.

use crate::files::{find_files, referenced_files};
use agsim_core::{file, AgsimError, AgsimResult};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_PORT: u16 = 50000;

/// Append the default port to an address that does not name one.
pub fn server_address(address: &str) -> String {
    let has_port = match address.rsplit_once(':') {
        // A bare IPv6 address contains colons but no port.
        Some((host, port)) => port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']')),
        None => false,
    };
    if has_port {
        address.to_string()
    } else if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, DEFAULT_PORT)
    } else {
        format!("{}:{}", address, DEFAULT_PORT)
    }
}

/// The simulation files named by `spec` followed by every file they reference.
pub fn gather_files(spec: &str, recurse: bool) -> AgsimResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in find_files(spec, recurse)? {
        let mut tree = file::read(&path)?;
        files.push(path.clone());
        for reference in referenced_files(&mut tree)? {
            if !reference.is_file() {
                return Err(AgsimError::Error(format!(
                    "Could not find '{}' referenced by '{}'",
                    reference.display(),
                    path.display()
                )));
            }
            if !files.contains(&reference) {
                files.push(reference);
            }
        }
    }
    Ok(files)
}

/// Write the framed files to `writer`.
pub fn write_files<W: Write>(writer: &mut W, files: &[PathBuf]) -> AgsimResult<()> {
    let count = u32::try_from(files.len())
        .map_err(|_| AgsimError::Error("Too many files to send".to_string()))?;
    writer.write_all(&count.to_le_bytes())?;
    for path in files {
        let name = file_name(path)?;
        let contents = fs::read(path)?;
        let name_length = u32::try_from(name.len())
            .map_err(|_| AgsimError::Error(format!("File name '{}' is too long", name)))?;
        writer.write_all(&name_length.to_le_bytes())?;
        writer.write_all(name.as_bytes())?;
        writer.write_all(&(contents.len() as u64).to_le_bytes())?;
        writer.write_all(&contents)?;
        debug!(file = %path.display(), bytes = contents.len(), "Sent file");
    }
    writer.flush()?;
    Ok(())
}

/// Read files framed by [`write_files`], as `(name, contents)` pairs.
pub fn read_files<R: Read>(reader: &mut R) -> AgsimResult<Vec<(String, Vec<u8>)>> {
    let mut u32_buffer = [0u8; 4];
    let mut u64_buffer = [0u8; 8];
    reader.read_exact(&mut u32_buffer)?;
    let count = u32::from_le_bytes(u32_buffer);

    let mut files = Vec::new();
    for _ in 0..count {
        reader.read_exact(&mut u32_buffer)?;
        let name = read_block(reader, u64::from(u32::from_le_bytes(u32_buffer)), "file name")?;
        let name = String::from_utf8(name)
            .map_err(|e| AgsimError::Error(format!("File name is not UTF-8: {}", e)))?;

        reader.read_exact(&mut u64_buffer)?;
        let contents = read_block(reader, u64::from_le_bytes(u64_buffer), &name)?;
        files.push((name, contents));
    }
    Ok(files)
}

/// Read exactly `length` bytes, growing the buffer only as data arrives.
fn read_block<R: Read>(reader: &mut R, length: u64, what: &str) -> AgsimResult<Vec<u8>> {
    let mut block = Vec::new();
    let read = (&mut *reader).take(length).read_to_end(&mut block)?;
    if read as u64 != length {
        return Err(AgsimError::Error(format!(
            "Truncated {}: expected {} bytes, received {}",
            what, length, read
        )));
    }
    Ok(block)
}

fn file_name(path: &Path) -> AgsimResult<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| AgsimError::Error(format!("Cannot send '{}'", path.display())))
}

/// Send `files` to the server at `address` and copy its status lines to `out`.
pub fn send<W: Write>(address: &str, files: &[PathBuf], out: &mut W) -> AgsimResult<()> {
    let address = server_address(address);
    info!(server = %address, files = files.len(), "Connecting to run server");
    let mut stream = TcpStream::connect(&address)?;
    writeln!(out, "Connected to {}", stream.peer_addr()?)?;

    write_files(&mut stream, files)?;
    for line in BufReader::new(stream).lines() {
        writeln!(out, "{}", line?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn default_port_is_added() {
        assert_eq!(server_address("10.0.0.1"), "10.0.0.1:50000");
        assert_eq!(server_address("10.0.0.1:6000"), "10.0.0.1:6000");
        assert_eq!(server_address("localhost"), "localhost:50000");
        assert_eq!(server_address("::1"), "[::1]:50000");
        assert_eq!(server_address("[::1]:7000"), "[::1]:7000");
    }

    #[test]
    fn frames_are_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        fs::write(&path, "{}").unwrap();

        let mut buffer = Vec::new();
        write_files(&mut buffer, &[path]).unwrap();
        assert_eq!(&buffer[0..4], &[1, 0, 0, 0]);
        assert_eq!(&buffer[4..8], &[6, 0, 0, 0]);
        assert_eq!(&buffer[8..14], b"a.json");
        assert_eq!(&buffer[14..22], &[2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&buffer[22..], b"{}");

        let decoded = read_files(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(decoded, vec![("a.json".to_string(), b"{}".to_vec())]);
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_le_bytes());
        frame.extend_from_slice(&6u32.to_le_bytes());
        frame.extend_from_slice(b"a.json");
        frame.extend_from_slice(&u64::MAX.to_le_bytes());
        frame.extend_from_slice(b"{}");

        let err = read_files(&mut Cursor::new(frame)).unwrap_err();
        assert!(err.to_string().contains("Truncated a.json"));
    }

    #[test]
    fn echoes_server_status_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sims.json");
        fs::write(&path, "{ \"Name\": \"Simulations\" }").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let files = read_files(&mut stream).unwrap();
            for (name, contents) in &files {
                writeln!(stream, "Received {} ({} bytes)", name, contents.len()).unwrap();
            }
            writeln!(stream, "Finished").unwrap();
        });

        let mut out = Vec::new();
        send(&address, &[path], &mut out).unwrap();
        server.join().unwrap();

        let out = String::from_utf8(out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert!(lines[0].starts_with("Connected to 127.0.0.1"));
        assert_eq!(lines[1], "Received sims.json (25 bytes)");
        assert_eq!(lines[2], "Finished");
    }
}
