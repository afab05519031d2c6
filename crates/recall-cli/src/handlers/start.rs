use recall_runtime::{ServiceDirs, Settings, Worker, init_tracing, serve};

pub fn run(dirs: ServiceDirs, settings: Settings, port: Option<u16>) -> anyhow::Result<()> {
    dirs.ensure_layout()?;
    let log_path = init_tracing(&dirs.logs_dir())?;
    tracing::info!("logging to {}", log_path.display());

    let port = port.unwrap_or(settings.worker.port);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let worker = Worker::build(dirs, settings)?;
        serve(worker, port).await?;
        Ok(())
    })
}
