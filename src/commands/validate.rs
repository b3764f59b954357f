use super::Host;
use crate::Result;
use crate::config::Config;
use camino::Utf8PathBuf;
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file (default is `velocity.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,
}

pub fn validate_config<H: Host>(host: &mut H, args: &ValidateArgs) -> Result<()> {
    let config_path = args.config.as_deref();

    match Config::load(config_path) {
        Ok(config) => {
            let _ = writeln!(host.output(), "Configuration file is valid");
            if let Some(path) = config_path {
                let _ = writeln!(host.output(), "Config file: {path}");
            }
            let _ = writeln!(host.output(), "Repositories: {}", config.repos.len());
            Ok(())
        }
        Err(e) => {
            let _ = writeln!(host.error(), "❌ Configuration validation failed: {e}");
            host.exit(1);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::host::TestHost;
    use crate::commands::init::{InitArgs, init_config};
    use std::fs;

    fn write_config(dir: &tempfile::TempDir, text: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("velocity.toml")).unwrap();
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_default_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("velocity.toml")).unwrap();

        let mut host = TestHost::new();
        init_config(&mut host, &InitArgs { output: Some(path.clone()) }).unwrap();

        let mut host = TestHost::new();
        validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap();
        assert!(host.output_text().contains("Configuration file is valid"));
        assert_eq!(host.exit_code, None);
    }

    #[test]
    fn test_repositories_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[[repos]]\norg = \"acme\"\nname = \"widget\"\n");

        let mut host = TestHost::new();
        validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap();
        assert!(host.output_text().contains("Repositories: 1"));
    }

    #[test]
    fn test_invalid_toml_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[[repos]\norg = \"acme\"\n");

        let mut host = TestHost::new();
        let _ = validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap_err();
        assert!(host.error_text().contains("Configuration validation failed"));
        assert_eq!(host.exit_code, Some(1));
    }

    #[test]
    fn test_conflicting_release_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[[repos]]\norg = \"acme\"\nname = \"widget\"\ntagged_releases = true\nbranch_releases = true\n",
        );

        let mut host = TestHost::new();
        let _ = validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap_err();
        assert_eq!(host.exit_code, Some(1));
    }

    #[test]
    fn test_invalid_duration_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "request_timeout = \"not a valid duration\"\n");

        let mut host = TestHost::new();
        let _ = validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap_err();
    }

    #[test]
    fn test_empty_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "# Empty config file\n");

        let mut host = TestHost::new();
        validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap();
    }
}
