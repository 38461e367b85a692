//! Hand a message over to a desktop mail client.

use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::Command;

/// Client launched by `open` unless another is named.
pub const THUNDERBIRD: &str = "thunderbird";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Status { program: String, status: ExitStatus },
}

/// Thunderlink URL addressing a message by its Message-ID.
pub fn thunderlink(id: &str) -> String {
    let id = id.trim().trim_matches(&['<', '>'][..]);
    format!("thunderlink://messageid={id}")
}

/// Run `program -thunderlink <link>` and wait for it to exit.
pub async fn open_in_client(program: &str, id: &str) -> Result<(), LaunchError> {
    let link = thunderlink(id);
    log::info!("opening {} with {}", link, program);

    let status = Command::new(program)
        .arg("-thunderlink")
        .arg(&link)
        .status()
        .await
        .map_err(|source| LaunchError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(LaunchError::Status {
            program: program.to_string(),
            status,
        })
    }
}
