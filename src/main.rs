use anyhow::Result;
use clap::Parser;
use mariadb_log_consumer::{
    cli::Cli,
    consumer::Consumer,
    error::{ConsumerError, EXIT_GENERIC},
    logging::{LogConfig, init_logging},
    signals::install_handlers,
};
use std::process::ExitCode;

fn run() -> Result<()> {
    let config = Cli::parse().into_config()?;
    config.validate()?;

    // guard 必须持有到进程退出，否则文件日志可能丢失
    let _guard = init_logging(LogConfig::from_settings(&config.log)?)?;
    tracing::debug!("配置: {:?}", config);

    install_handlers()?;
    Consumer::start(&config)?.run()?;
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mariadb-log-consumer: {err}");
            let code = err
                .downcast_ref::<ConsumerError>()
                .map_or(EXIT_GENERIC, ConsumerError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
