use std::io;
use std::sync::atomic::Ordering;

use super::region::SharedRegion;

/// Child-side append cursor over a relay region.
///
/// Text is NUL-terminated. Each append writes its body and the new
/// terminator first, then publishes the first byte with release ordering, so
/// a reader that observes the first byte also observes the rest.
#[derive(Debug)]
pub struct RelayWriter {
    region: SharedRegion,
    cursor: usize,
}

impl RelayWriter {
    pub fn open(name: &str, len: usize) -> io::Result<Self> {
        Ok(Self::new(SharedRegion::open(name, len)?))
    }

    /// Wraps a mapped region, continuing after any text already in it.
    pub fn new(region: SharedRegion) -> Self {
        let cursor = region
            .cells()
            .iter()
            .position(|c| c.load(Ordering::Acquire) == 0)
            .unwrap_or(region.len());
        Self { region, cursor }
    }

    /// Bytes written so far.
    #[cfg(test)]
    pub fn written(&self) -> usize {
        self.cursor
    }

    /// Appends `bytes`, dropping embedded NULs.
    ///
    /// The last cell always stays a terminator; an append that would use it
    /// fails with `WriteZero` and writes nothing.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let payload: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0).collect();
        let Some((&first, rest)) = payload.split_first() else {
            return Ok(bytes.len());
        };

        let cells = self.region.cells();
        let end = self.cursor + payload.len();
        if end >= cells.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "relay region is full",
            ));
        }

        cells[end].store(0, Ordering::Relaxed);
        for (offset, byte) in rest.iter().enumerate() {
            cells[self.cursor + 1 + offset].store(*byte, Ordering::Relaxed);
        }
        cells[self.cursor].store(first, Ordering::Release);

        self.cursor = end;
        Ok(bytes.len())
    }
}

impl io::Write for RelayWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Parent-side read cursor. The reader owns the region and removes it on drop.
#[derive(Debug)]
pub struct RelayReader {
    region: SharedRegion,
    offset: usize,
}

impl RelayReader {
    pub fn create(name: &str, len: usize) -> io::Result<Self> {
        Ok(Self {
            region: SharedRegion::create(name, len)?,
            offset: 0,
        })
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Bytes consumed so far. Never decreases.
    #[cfg(test)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// True once the writer has published anything.
    pub fn has_content(&self) -> bool {
        self.region.cells()[0].load(Ordering::Acquire) != 0
    }

    // Published bytes past the read offset, up to the terminator.
    fn pending(&self) -> Vec<u8> {
        self.region.cells()[self.offset..]
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .take_while(|b| *b != 0)
            .collect()
    }

    /// Consumes every complete line past the offset.
    ///
    /// A trailing line without its newline stays unread until the writer
    /// finishes it.
    pub fn read_lines(&mut self) -> Vec<String> {
        let pending = self.pending();
        let Some(last_newline) = pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        self.offset += last_newline + 1;

        String::from_utf8_lossy(&pending[..last_newline])
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect()
    }

    /// Consumes whatever is left, complete line or not.
    pub fn take_remainder(&mut self) -> Option<String> {
        let pending = self.pending();
        if pending.is_empty() {
            return None;
        }
        self.offset += pending.len();
        Some(
            String::from_utf8_lossy(&pending)
                .trim_end_matches(['\r', '\n'])
                .to_string(),
        )
    }
}
