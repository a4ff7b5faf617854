/// Control byte that opens a chunk sequence.
pub const BEGIN_MARKER: u8 = 0;
/// Control byte that closes a chunk sequence.
pub const END_MARKER: u8 = 1;

/// A broker message interpreted as control or data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope<'a> {
    Begin,
    End,
    Data(&'a [u8]),
}

impl<'a> Envelope<'a> {
    pub fn classify(body: &'a [u8]) -> Self {
        match body {
            [BEGIN_MARKER] => Envelope::Begin,
            [END_MARKER] => Envelope::End,
            data => Envelope::Data(data),
        }
    }

    /// True for data that a receiver would mistake for a marker.
    pub fn is_ambiguous(data: &[u8]) -> bool {
        matches!(data, [BEGIN_MARKER] | [END_MARKER])
    }
}
