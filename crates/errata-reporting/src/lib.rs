pub mod export;

pub use export::{
    ExportError, OutputPaths, export_run, metrics_csv, output_paths, responses_csv,
    safe_model_name,
};
