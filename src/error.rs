use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum ValidationError {
    #[display("ticker must not be empty")]
    EmptyTicker,
    #[display("threshold price must be positive, got {value}")]
    NonPositivePrice { value: f64 },
    #[display("duplicate alert id {id}")]
    DuplicateId { id: String },
    #[display("update names no fields to change")]
    EmptyUpdate,
    #[display("status \"{status}\" cannot be assigned directly")]
    ReservedStatus { status: String },
}

#[derive(Debug, Display, Error)]
pub enum StoreError {
    #[display("alert {id} not found")]
    NotFound { id: String },
    #[display("alert store is corrupt: {path}")]
    Corrupt { path: String },
    #[display("failed to read alert store")]
    Read,
    #[display("failed to write alert store")]
    Write,
    #[display("invalid alert input")]
    Validation,
}

#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[display("quote request for {ticker} failed")]
    Request { ticker: String },
    #[display("failed to parse quote response for {ticker}")]
    ResponseParse { ticker: String },
    #[display("no usable price in quote response for {ticker}")]
    MissingPrice { ticker: String },
}

#[derive(Debug, Display, Error)]
pub enum NotifyError {
    #[display("failed to deliver desktop notification")]
    Send,
}
