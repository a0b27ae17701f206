use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::{fs, path::PathBuf};

/// Timestamp layout used in artifact file names, local time with
/// microsecond precision.
pub const FORMAT_STRING: &str = "%Y-%m-%dT%H%M%S%.6f";

pub fn get_random_string(len: i32) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len as usize)
        .map(char::from)
        .collect()
}

pub fn create_random_tmp_folder() -> anyhow::Result<PathBuf> {
    let rand_folder_name: String = get_random_string(11);

    let path = PathBuf::from(format!("/tmp/crawler-{}", rand_folder_name));
    fs::create_dir(&path)?;
    Ok(path)
}
