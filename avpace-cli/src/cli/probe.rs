//! `avpace probe`: stream listing without playback.

use avpace_lib::container::info::MediaInfo;
use avpace_lib::BackendError;

pub fn run_probe(file_path: &str) -> Result<i32, BackendError> {
    let info = MediaInfo::probe(file_path)?;
    log::info!("probed {} stream(s) in {}", info.streams.len(), file_path);
    println!("{}", info.to_json());
    Ok(0)
}
