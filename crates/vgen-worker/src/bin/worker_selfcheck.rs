use std::path::Path;

use vgen_media::{check_ffmpeg, check_ffprobe};
use vgen_worker::{ProviderSettings, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();
    let settings = ProviderSettings::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_tools()?;
    ensure_env_present(&settings.required_env())?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("work dir {} not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_tools() -> anyhow::Result<()> {
    let ffmpeg = check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    let ffprobe = check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    println!(
        "worker-selfcheck: ffmpeg={} ffprobe={}",
        ffmpeg.display(),
        ffprobe.display()
    );
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
