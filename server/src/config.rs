use std::path::PathBuf;
use std::time::Duration;

/// One external worker executable: the program plus its fixed arguments.
/// The request payload is never passed as an argument; it goes to stdin.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Parse a whitespace-separated command string, e.g. `python chatbot.py`.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("worker command must not be empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the server listens on
    pub port: u16,
    /// Path to the SQLite conversation database
    pub database_url: String,
    /// Directory where uploaded documents are staged
    pub upload_dir: PathBuf,
    /// Command handling chat questions
    pub chat_worker: WorkerCommand,
    /// Command handling document ingestion
    pub ingest_worker: WorkerCommand,
    /// Hard deadline for a single worker run
    pub worker_timeout: Duration,
    /// Maximum number of workers running at once
    pub worker_max_concurrency: usize,
    /// How many requests may wait for a worker slot
    pub worker_queue_capacity: usize,
    /// How long a queued request waits for a slot before failing busy
    pub worker_queue_wait: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: env_parse("PORT", 5000)?,
            database_url: env_str("DATABASE_URL", "sqlite:./data/policy_qa.db"),
            upload_dir: PathBuf::from(env_str("UPLOAD_DIR", "./data/uploads")),
            chat_worker: WorkerCommand::parse(&env_str("CHAT_WORKER_CMD", "python chatbot.py"))?,
            ingest_worker: WorkerCommand::parse(&env_str(
                "INGEST_WORKER_CMD",
                "python load_documents.py",
            ))?,
            worker_timeout: Duration::from_secs(env_parse("WORKER_TIMEOUT_SECS", 120)?),
            worker_max_concurrency: env_parse("WORKER_MAX_CONCURRENCY", 4)?,
            worker_queue_capacity: env_parse("WORKER_QUEUE_CAPACITY", 8)?,
            worker_queue_wait: Duration::from_secs(env_parse("WORKER_QUEUE_WAIT_SECS", 10)?),
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_command_splits_program_and_args() {
        let cmd = WorkerCommand::parse("python chatbot.py --quiet").unwrap();
        assert_eq!(cmd.program, "python");
        assert_eq!(cmd.args, vec!["chatbot.py", "--quiet"]);
    }

    #[test]
    fn empty_worker_command_is_rejected() {
        assert!(WorkerCommand::parse("   ").is_err());
    }
}
