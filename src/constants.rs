pub const DEFAULT_INPUT_PATH: &str = "data/raw/sus.csv";
pub const DEFAULT_EXPORT_PATH: &str = "data/output/dataset_covid_dashboard.csv";

pub const DB_PATH_ENV: &str = "DB_PATH";
pub const DB_DIR_ENV: &str = "DB_DIR";
pub const DB_NAME_ENV: &str = "DB_NAME";
pub const DEFAULT_DB_DIR: &str = "data";
pub const DEFAULT_DB_NAME: &str = "sus";

/// Codes at or below this value are never official municipality codes.
pub const MAX_INVALID_IBGE_CODE: i64 = 99_999;

pub const TEST_SLOTS: usize = 4;
pub const DOSE_SLOTS: usize = 2;
