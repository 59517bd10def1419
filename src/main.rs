use prodserve::{logger, start_server, Config};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::load()?;
    let options = cfg.into_options()?;

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = options.workers {
        runtime_builder.worker_threads(workers);
        println!("[CONFIG] Using {workers} worker threads");
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(options))
}

async fn async_main(options: prodserve::ServerOptions) -> Result<(), Box<dyn std::error::Error>> {
    let handle = start_server(options).await?;

    tokio::signal::ctrl_c().await?;
    logger::log_warning("interrupt received, shutting down");
    handle.close().await;

    Ok(())
}
