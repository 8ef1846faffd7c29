/// A contiguous byte range of a remote resource, as used by `SegmentBase`
/// style manifests where several segments share one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    pub fn is_empty(&self) -> bool {
        self.length == Some(0)
    }

    /// Value of the HTTP `Range` header, `None` for an empty range.
    pub fn to_http_range(&self) -> Option<String> {
        match self.length {
            Some(0) => None,
            Some(length) => Some(format!(
                "bytes={}-{}",
                self.offset,
                self.offset.saturating_add(length - 1)
            )),
            None => Some(format!("bytes={}-", self.offset)),
        }
    }
}
