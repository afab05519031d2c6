mod args;
mod handlers;
mod mcp;

pub use args::{Cli, Command};

use recall_runtime::{ServiceDirs, Settings};

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let dirs = match &cli.dir {
        Some(dir) => ServiceDirs::at(dir),
        None => ServiceDirs::resolve()?,
    };
    let settings = Settings::load(&dirs.settings_file())?;

    match cli.command {
        Command::Start { port } => handlers::start::run(dirs, settings, port),
        Command::Export {
            format,
            output,
            project,
            no_vectors,
        } => handlers::export::run(dirs, format.into(), output, project, no_vectors),
        Command::GitSync { action } => handlers::git_sync::run(dirs, settings, action),
        Command::Migrate {
            source,
            project,
            fields,
            timestamp_format,
            embedding_format,
            facts_format,
            memory_session,
            batch_size,
            dry_run,
        } => handlers::migrate::run(
            dirs,
            handlers::migrate::MigrateArgs {
                source,
                project,
                fields,
                timestamp_format: timestamp_format.map(Into::into),
                embedding_format: embedding_format.map(Into::into),
                facts_format: facts_format.map(Into::into),
                memory_session,
                batch_size,
                dry_run,
            },
        ),
        Command::Mcp { port } => handlers::mcp_serve(settings, port),
        Command::Hook {
            platform,
            event,
            port,
        } => handlers::hook::run(settings, &platform, &event, port),
    }
}
