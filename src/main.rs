use std::{path::PathBuf, process::ExitCode};

use parrec_volume::{LoadOptions, volume_loader::VolumeLoader};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: parrec-volume <file.PAR|file.REC>");
        return ExitCode::FAILURE;
    };

    match VolumeLoader::load(&path, LoadOptions::default()) {
        Ok(image) => {
            print!("{image}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}: {err}", path.display());
            ExitCode::FAILURE
        }
    }
}
