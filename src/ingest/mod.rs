pub mod fanout;
pub mod rows;
pub mod source;

pub use fanout::{IngestOptions, IngestReport, IngestRequest, Ingestor, LeadPayload};
pub use rows::{parse_rows, ParsedSource, RowParseOptions, SourceRow};
pub use source::{HttpSpreadsheetSource, LocalSpreadsheetSource, SpreadsheetSource};
