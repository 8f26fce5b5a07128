use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Failed to fetch dataset: {0}")]
    Fetch(String),

    #[error("Failed to parse dataset: {0}")]
    Parse(String),

    #[error("Dataset is missing required columns: {}", .0.join(", "))]
    Schema(Vec<String>),

    #[error("No such view: '{0}'")]
    UnknownView(String),

    #[error("Chart encoding error: {0}")]
    Encoding(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Invalid controls: {0}")]
    Controls(String),

    #[error("Render error: {0}")]
    Render(String),
}

impl From<reqwest::Error> for DashboardError {
    fn from(err: reqwest::Error) -> Self {
        DashboardError::Fetch(err.to_string())
    }
}

impl From<calamine::Error> for DashboardError {
    fn from(err: calamine::Error) -> Self {
        DashboardError::Parse(err.to_string())
    }
}

impl From<csv::Error> for DashboardError {
    fn from(err: csv::Error) -> Self {
        DashboardError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
