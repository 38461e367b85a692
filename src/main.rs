use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use mailindex::config::{ArchiveConfig, IndexerConfig};
use mailindex::error::IndexError;
use mailindex::external::{self, THUNDERBIRD};
use mailindex::search::{
    MailDocument, RankingRulesFile, SearchService, StopWordsFile, SynonymsFile, combine_filters,
    folder_filter, translate_filter,
};
use mailindex::settings::read_settings_file;
use mailindex::sync::source::{ArchiveLayout, ArchiveSource, ImapSource, StoreSource, mailbox};
use mailindex::sync::{Pipeline, PipelineStats, PushSink};

#[derive(Parser, Debug)]
#[command(
    name = "mailindex",
    about = "Index mail from IMAP, mbox archives or a Mailspring store into Meilisearch",
    version
)]
struct Cli {
    /// Config file; defaults to `~/.mailindex.json`, created on first run.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Meilisearch base URL.
    #[arg(long, global = true)]
    meilisearch_url: Option<String>,

    /// Name of the index holding mail documents.
    #[arg(long, global = true)]
    index: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read mail from a source and push it to the index.
    Index(IndexArgs),
    /// Search the index.
    Query(QueryArgs),
    /// Inspect or replace index settings.
    Settings {
        #[command(subcommand)]
        setting: SettingCommand,
    },
    /// Show document count and indexing state.
    Stats,
    /// List the mailboxes of the configured IMAP account.
    Mailboxes,
    /// Open a message in the desktop mail client by its Message-ID.
    Open {
        id: String,

        /// Client program, called as `<client> -thunderlink <link>`.
        #[arg(long, default_value = THUNDERBIRD)]
        client: String,
    },
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Messages per pushed batch.
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Concurrent pushes allowed at once.
    #[arg(long, global = true)]
    max_in_flight: Option<usize>,

    #[command(subcommand)]
    source: IndexSource,
}

#[derive(Subcommand, Debug)]
enum IndexSource {
    /// Fetch every message of one or more IMAP mailboxes.
    Imap {
        /// Mailbox to fetch; repeat for several. Defaults to the configured folder.
        #[arg(long = "folder")]
        folders: Vec<String>,
    },
    /// Index a single mbox file.
    File {
        #[arg(long)]
        file: PathBuf,
    },
    /// Index a directory of mbox files.
    Dir {
        /// Archive root. Defaults to the configured directory.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Descend into nested folders. Always on when `--dir` is given.
        #[arg(long)]
        recursive: bool,

        /// Directory suffix marking a folder's children (repeatable, default `.sbd`).
        #[arg(long = "boundary-suffix")]
        boundary_suffixes: Vec<String>,
    },
    /// Index a Mailspring `edgehill.db` store.
    Mailspring {
        #[arg(long)]
        db: PathBuf,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Only return mail from this folder.
    #[arg(long)]
    folder: Option<String>,

    /// Filter expression; accepts `after=`, `before=` and `time="a:b"`.
    #[arg(long)]
    filter: Option<String>,

    #[arg(long, default_value_t = 100)]
    limit: usize,

    /// Search words.
    words: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum SettingCommand {
    StopWords {
        #[command(subcommand)]
        action: SettingAction,
    },
    Ranking {
        #[command(subcommand)]
        action: SettingAction,
    },
    Synonyms {
        #[command(subcommand)]
        action: SettingAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingAction {
    /// Print the current value as a settings file.
    Get,
    /// Replace the value from a JSON settings file.
    Set { file: PathBuf },
}

#[tokio::main]
async fn main() {
    mailindex::init_logger();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        log::error!("{}", err);
        let code = if err.is_connection() { 2 } else { 1 };
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), IndexError> {
    let config_path = cli.config.unwrap_or_else(IndexerConfig::default_path);
    let mut config = IndexerConfig::load(&config_path)?;
    if let Some(url) = cli.meilisearch_url {
        config.search.url = url;
    }
    if let Some(index) = cli.index {
        config.search.index = index;
    }

    match cli.command {
        Command::Index(args) => {
            if let Some(batch_size) = args.batch_size {
                config.archive.batch_size = batch_size;
            }
            if let Some(max_in_flight) = args.max_in_flight {
                config.push.max_in_flight = max_in_flight;
            }
            index(config, args.source).await
        }
        Command::Query(args) => query(&config, args).await,
        Command::Settings { setting } => settings(&config, setting).await,
        Command::Stats => stats(&config).await,
        Command::Mailboxes => mailboxes(&config).await,
        Command::Open { id, client } => Ok(external::open_in_client(&client, &id).await?),
    }
}

async fn index(config: IndexerConfig, source: IndexSource) -> Result<(), IndexError> {
    let service = SearchService::connect(&config.search).await?;
    let sink = Arc::new(PushSink::new(Arc::new(service), &config.push));
    let pipeline = Pipeline::new(Arc::clone(&sink), config.archive.batch_size);
    log::info!("pushing with up to {} concurrent batches", sink.budget());

    let totals = match source {
        IndexSource::Imap { folders } => {
            let folders = if folders.is_empty() {
                vec![config.imap.folder.clone()]
            } else {
                folders
            };
            let mut totals = PipelineStats::default();
            // One mailbox at a time; each is held in memory until indexed.
            for folder in folders {
                let imap = config.imap.clone();
                let source =
                    tokio::task::spawn_blocking(move || ImapSource::fetch(&imap, &folder))
                        .await??;
                log::info!("indexing mailbox {}", source.label());
                totals.merge(pipeline.run(source).await?);
            }
            totals
        }
        IndexSource::File { file } => pipeline.run(ArchiveSource::single_file(&file)?).await?,
        IndexSource::Dir {
            dir,
            recursive,
            boundary_suffixes,
        } => {
            let (root, recursive) = archive_root(dir, recursive, &config.archive);
            let mut layout = ArchiveLayout::default();
            if !boundary_suffixes.is_empty() {
                layout = layout.with_boundary_suffixes(boundary_suffixes);
            }
            let source = ArchiveSource::open(&root, recursive, &layout)?;
            log::info!(
                "indexing {} mbox files under {}",
                source.pending_labels().len(),
                root.display()
            );
            pipeline.run(source).await?
        }
        IndexSource::Mailspring { db } => {
            let source = StoreSource::open(&db, config.archive.batch_size).await?;
            log::info!("indexing {} stored messages from {}", source.total(), db.display());
            pipeline.run(source).await?
        }
    };

    sink.wait_idle().await;
    let pushed = sink.stats();
    log::info!(
        "done: {} messages read, {} skipped, {} batches; {} documents pushed, {} failed",
        totals.seen,
        totals.skipped,
        totals.batches,
        pushed.pushed_documents,
        pushed.failed_documents
    );
    Ok(())
}

/// Archive root and recursion for `index dir`. An explicit `--dir` is always
/// walked recursively; otherwise the configured directory and setting apply.
fn archive_root(
    dir: Option<PathBuf>,
    recursive: bool,
    config: &ArchiveConfig,
) -> (PathBuf, bool) {
    match dir {
        Some(dir) => (dir, true),
        None => (config.directory.clone(), recursive || config.recursive),
    }
}

async fn query(config: &IndexerConfig, args: QueryArgs) -> Result<(), IndexError> {
    let service = SearchService::new(&config.search)?;

    let mut clauses = Vec::new();
    if let Some(expr) = args.filter.as_deref() {
        clauses.push(translate_filter(expr));
    }
    if let Some(folder) = args.folder.as_deref() {
        clauses.push(folder_filter(folder));
    }
    let filter = combine_filters(clauses);
    log::debug!("search filter: {:?}", filter);

    let results = service
        .search(&args.words.join(" "), filter.as_deref(), args.limit)
        .await?;

    let mut out = io::stdout().lock();
    writeln!(out, "{} hits", results.total)?;
    for hit in &results.hits {
        print_hit(&mut out, &hit.document)?;
    }
    Ok(())
}

fn print_hit(out: &mut impl Write, document: &MailDocument) -> io::Result<()> {
    let date = document
        .date_time()
        .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();

    writeln!(out, "---")?;
    writeln!(out, "{}  [{}]  {}", date, document.folder, document.subject)?;
    writeln!(out, "From: {}", document.from)?;
    if !document.to.is_empty() {
        writeln!(out, "To: {}", document.to.join(", "))?;
    }
    if !document.cc.is_empty() {
        writeln!(out, "Cc: {}", document.cc.join(", "))?;
    }
    if !document.attachments.is_empty() {
        writeln!(out, "Attachments: {}", document.attachments)?;
    }
    writeln!(out, "Id: {}", document.id)?;
    writeln!(out)?;
    writeln!(out, "{}", document.message.trim_end())
}

async fn settings(config: &IndexerConfig, command: SettingCommand) -> Result<(), IndexError> {
    let service = SearchService::new(&config.search)?;

    match command {
        SettingCommand::StopWords {
            action: SettingAction::Get,
        } => print_json(&StopWordsFile {
            stop_words: service.stop_words().await?,
        }),
        SettingCommand::StopWords {
            action: SettingAction::Set { file },
        } => {
            let settings: StopWordsFile = read_settings_file(&file)?;
            service.set_stop_words(&settings.stop_words).await?;
            log::info!("stored {} stop words", settings.stop_words.len());
            Ok(())
        }
        SettingCommand::Ranking {
            action: SettingAction::Get,
        } => print_json(&RankingRulesFile {
            rankings: service.ranking_rules().await?,
        }),
        SettingCommand::Ranking {
            action: SettingAction::Set { file },
        } => {
            let settings: RankingRulesFile = read_settings_file(&file)?;
            service.set_ranking_rules(&settings.rankings).await?;
            log::info!("stored {} ranking rules", settings.rankings.len());
            Ok(())
        }
        SettingCommand::Synonyms {
            action: SettingAction::Get,
        } => print_json(&SynonymsFile {
            synonyms: service.synonyms().await?,
        }),
        SettingCommand::Synonyms {
            action: SettingAction::Set { file },
        } => {
            let settings: SynonymsFile = read_settings_file(&file)?;
            service.set_synonyms(&settings.synonyms).await?;
            log::info!("stored {} synonym entries", settings.synonyms.len());
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), IndexError> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

async fn stats(config: &IndexerConfig) -> Result<(), IndexError> {
    let service = SearchService::new(&config.search)?;
    let stats = service.stats().await?;

    let mut out = io::stdout().lock();
    writeln!(out, "index:          {}", service.index_uid())?;
    writeln!(out, "documents:      {}", stats.number_of_documents)?;
    writeln!(out, "indexing:       {}", stats.is_indexing)?;
    writeln!(out, "server version: {}", stats.server_version)?;
    Ok(())
}

async fn mailboxes(config: &IndexerConfig) -> Result<(), IndexError> {
    let imap = config.imap.clone();
    let names = tokio::task::spawn_blocking(move || mailbox::list_mailboxes(&imap)).await??;

    let mut out = io::stdout().lock();
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn archive_config(recursive: bool) -> ArchiveConfig {
        ArchiveConfig {
            directory: PathBuf::from("/home/ann/.mails"),
            recursive,
            batch_size: 10,
        }
    }

    #[test]
    fn test_explicit_dir_is_recursive() {
        let (root, recursive) =
            archive_root(Some(PathBuf::from("/tmp/mail")), false, &archive_config(false));
        assert_eq!(root, Path::new("/tmp/mail"));
        assert!(recursive);
    }

    #[test]
    fn test_configured_dir_follows_settings() {
        let (root, recursive) = archive_root(None, false, &archive_config(false));
        assert_eq!(root, Path::new("/home/ann/.mails"));
        assert!(!recursive);

        assert!(archive_root(None, false, &archive_config(true)).1);
        assert!(archive_root(None, true, &archive_config(false)).1);
    }

    #[test]
    fn test_open_defaults_to_thunderbird() {
        let cli = Cli::try_parse_from(["mailindex", "open", "abc@example.com"]).unwrap();
        match cli.command {
            Command::Open { id, client } => {
                assert_eq!(id, "abc@example.com");
                assert_eq!(client, THUNDERBIRD);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_config_flag_is_global() {
        let cli = Cli::try_parse_from(["mailindex", "stats", "--config", "/tmp/mi.json"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/mi.json")));
    }
}
