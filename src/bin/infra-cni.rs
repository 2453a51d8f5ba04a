use anyhow::Result;
use infra_cni::commands::{error_code, run_cni};
use infra_cni::types::CniError;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    // Set up tracing; stdout is reserved for the CNI result
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    // Run the CNI plugin
    if let Err(err) = run_cni() {
        error!("CNI plugin error: {:#}", err);

        // Output error in CNI format
        let cni_error = CniError::new("1.0.0", error_code(&err), err.to_string(), format!("{:#}", err));
        if cni_error.print().is_err() {
            eprintln!("{:#}", err);
        }
        std::process::exit(1);
    }

    Ok(())
}
