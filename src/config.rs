//! Optional configuration, read from `hexed.toml`.

use std::env;
use std::fs;
use std::path::PathBuf;

/// Everything the emulator lets you override.  Every field is
/// optional in the file; absent values take the defaults below.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Program to run on the pty; falls back to $SHELL.
    pub shell: Option<String>,
    /// Value exported as TERM for the child.
    pub term: String,
    /// Where diagnostics go.  The UI owns the tty, so logging has to
    /// live in a file.
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Config {
        Config { shell: None, term: "xterm".to_string(), log_file: PathBuf::from("hexed.log") }
    }
}

impl Config {
    /// Load the first config file found, or the defaults.  This runs
    /// before logging is up, so parse problems go to stderr.
    pub fn load() -> Config {
        for path in Config::candidate_paths() {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(_) => continue,
            };
            match toml::from_str(&text) {
                Ok(config) => return config,
                Err(err) => {
                    eprintln!("{}: {}", path.display(), err);
                    break;
                }
            }
        }
        Config::default()
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("hexed.toml")];
        if let Ok(home) = env::var("HOME") {
            paths.push(PathBuf::from(home).join(".config").join("hexed.toml"));
        }
        paths
    }
}
