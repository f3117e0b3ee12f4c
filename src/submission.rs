use std::io;
use std::path::{Path, PathBuf};

use exec_api::{ExecutionRequest, Language};

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot infer the language of {}; pass --language", path.display())]
    UnknownLanguage { path: PathBuf },
}

/// Builds a request from a source file. The language comes from `language`
/// when given, otherwise from the file extension.
pub fn request_from_file(
    path: &Path,
    language: Option<Language>,
) -> Result<ExecutionRequest, SubmissionError> {
    let language = match language {
        Some(language) => language,
        None => path
            .extension()
            .and_then(|extension| extension.to_str())
            .and_then(Language::from_extension)
            .ok_or_else(|| SubmissionError::UnknownLanguage {
                path: path.to_path_buf(),
            })?,
    };

    let code = std::fs::read_to_string(path).map_err(|source| SubmissionError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(ExecutionRequest::new(code, language))
}
