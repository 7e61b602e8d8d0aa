use std::{
    io::Read,
    thread::{self, JoinHandle},
};

/// Drains a pipe on a background thread so the child never blocks on a full pipe.
#[derive(Debug)]
pub struct BackgroundReader {
    handle: JoinHandle<Vec<u8>>,
}

pub fn read_background<R: Read + Send + 'static>(mut r: R) -> BackgroundReader {
    let handle = thread::spawn(move || {
        let mut data = Vec::with_capacity(4096);
        let mut buf = vec![0_u8; 1024 * 64].into_boxed_slice();
        while let Ok(sz) = r.read(&mut buf[..]) {
            if sz == 0 {
                break;
            }
            data.extend_from_slice(&buf[..sz]);
        }
        data
    });
    BackgroundReader { handle }
}

impl BackgroundReader {
    /// Blocks until the writer side is closed.
    pub fn wait_finish(self) -> Vec<u8> {
        self.handle.join().unwrap_or_default()
    }

    pub fn wait_string(self) -> String {
        String::from_utf8_lossy(&self.wait_finish()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains() {
        let data = vec![7_u8; 200_000];
        let r = read_background(std::io::Cursor::new(data.clone()));
        assert_eq!(r.wait_finish(), data);
        let r = read_background(&b"hi"[..]);
        assert_eq!(r.wait_string(), "hi");
    }
}
