use thiserror::Error;

#[derive(Error, Debug)]
pub enum PKError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    
    #[error("Invalid drug definition: {0}")]
    InvalidDrug(String),
    
    #[error("Invalid dosing configuration: {0}")]
    InvalidDosing(String),
    
    #[error("Unknown drug: {0}")]
    UnknownDrug(String),
    
    #[error("Simulation error: {0}")]
    Simulation(String),
    
    #[error("Parameter validation error: {0}")]
    Validation(String),
}

pub type PKResult<T> = Result<T, PKError>;
