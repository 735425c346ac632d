use crate::error::{Result, SwitchError};
use serde::Deserialize;
use std::io::Read;

/// One raw wire message per CSV row, in the `message` column.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageRecord {
    pub message: String,
}

impl MessageRecord {
    pub fn as_bytes(&self) -> &[u8] {
        self.message.as_bytes()
    }
}

/// Reads raw messages from a CSV source.
///
/// Wraps `csv::Reader` and yields `Result<MessageRecord>`. Only leading
/// and trailing whitespace of headers is trimmed: message bodies keep their
/// padding, which is significant on the wire.
pub struct MessageReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> MessageReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes records, so large batches stream through.
    pub fn messages(self) -> impl Iterator<Item = Result<MessageRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(SwitchError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_keeps_padding() {
        let data = "message\n\"0800...   \"\n0800abc";
        let reader = MessageReader::new(data.as_bytes());
        let results: Vec<Result<MessageRecord>> = reader.messages().collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().message, "0800...   ");
        assert_eq!(results[1].as_ref().unwrap().as_bytes(), b"0800abc");
    }

    #[test]
    fn test_reader_quoted_commas() {
        let data = " message \n\"0100,with,commas\"";
        let reader = MessageReader::new(data.as_bytes());
        let results: Vec<Result<MessageRecord>> = reader.messages().collect();
        assert_eq!(results[0].as_ref().unwrap().message, "0100,with,commas");
    }

    #[test]
    fn test_reader_missing_column() {
        let data = "payload\n0800";
        let reader = MessageReader::new(data.as_bytes());
        let results: Vec<Result<MessageRecord>> = reader.messages().collect();
        assert!(results[0].is_err());
    }
}
