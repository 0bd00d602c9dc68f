//! Provider configuration as `RCLONE_CONFIG_<NAME>_*` environment variables.
//!
//! The variables are handed to each transfer child process rather than exported
//! into this process, so they exist exactly as long as the child does and
//! concurrent operations never see each other's configuration.

use crate::config::RemoteProvider;
use crate::utils::errors::TransferError;
use tracing::debug;

/// Validated environment for one provider's transfer processes.
#[derive(Clone)]
pub struct ProviderEnv {
    prefix: String,
    vars: Vec<(String, String)>,
}

impl ProviderEnv {
    pub fn prefix_for(provider_name: &str) -> String {
        format!("RCLONE_CONFIG_{}_", provider_name.to_ascii_uppercase())
    }

    /// Build the provider's type and option variables. Nothing is kept if any
    /// pair is unusable as an environment variable.
    pub fn setup(provider: &RemoteProvider) -> Result<Self, TransferError> {
        let prefix = Self::prefix_for(&provider.name);
        let pairs = std::iter::once((format!("{}TYPE", prefix), provider.kind.clone())).chain(
            provider
                .config
                .iter()
                .map(|(k, v)| (format!("{}{}", prefix, k.to_ascii_uppercase()), v.clone())),
        );

        let mut vars = Vec::new();
        for (key, value) in pairs {
            check_var(&key, &value)?;
            vars.push((key, value));
        }

        debug!("Provider environment prepared: {} ({} variables)", prefix, vars.len());
        Ok(Self { prefix, vars })
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::fmt::Debug for ProviderEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.vars.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ProviderEnv")
            .field("prefix", &self.prefix)
            .field("keys", &keys)
            .finish()
    }
}

fn check_var(key: &str, value: &str) -> Result<(), TransferError> {
    if key.is_empty() || key.contains('=') || key.contains('\0') {
        return Err(TransferError::Environment(format!(
            "invalid variable name '{}'",
            key.replace('\0', "\\0")
        )));
    }
    if value.contains('\0') {
        return Err(TransferError::Environment(format!(
            "value of {} contains a NUL byte",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn provider(name: &str, config: &[(&str, &str)]) -> RemoteProvider {
        RemoteProvider {
            name: name.to_string(),
            kind: "s3".to_string(),
            enabled: true,
            schedule: Vec::new(),
            path: "bucket".to_string(),
            max_versions: 0,
            timeout: 600,
            config: config
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_setup_builds_prefixed_variables() {
        let p = provider("offsite", &[("region", "eu-west-1"), ("access_key_id", "AK")]);
        let env = ProviderEnv::setup(&p).unwrap();
        let vars: Vec<(&str, &str)> = env.vars().collect();
        assert_eq!(
            vars,
            vec![
                ("RCLONE_CONFIG_OFFSITE_TYPE", "s3"),
                ("RCLONE_CONFIG_OFFSITE_ACCESS_KEY_ID", "AK"),
                ("RCLONE_CONFIG_OFFSITE_REGION", "eu-west-1"),
            ]
        );
        assert!(std::env::var("RCLONE_CONFIG_OFFSITE_TYPE").is_err());
    }

    #[test]
    fn test_invalid_pairs_rejected() {
        let p = provider("offsite", &[("access_key_id", "AK"), ("bad=key", "x")]);
        let err = ProviderEnv::setup(&p).unwrap_err();
        assert!(matches!(err, TransferError::Environment(_)));

        let p = provider("offsite", &[("region", "bad\0value")]);
        assert!(ProviderEnv::setup(&p).is_err());
    }

    #[test]
    fn test_debug_hides_values() {
        let p = provider("offsite", &[("secret_access_key", "SK-very-secret")]);
        let shown = format!("{:?}", ProviderEnv::setup(&p).unwrap());
        assert!(shown.contains("RCLONE_CONFIG_OFFSITE_SECRET_ACCESS_KEY"));
        assert!(!shown.contains("SK-very-secret"));
    }

    #[tokio::test]
    async fn test_variables_reach_child_only() {
        let p = provider("childenv", &[("region", "ap-south-1")]);
        let env = ProviderEnv::setup(&p).unwrap();
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("printf '%s' \"$RCLONE_CONFIG_CHILDENV_REGION\"")
            .envs(env.vars())
            .output()
            .await
            .unwrap();
        assert_eq!(output.stdout, b"ap-south-1");
        assert!(std::env::var("RCLONE_CONFIG_CHILDENV_REGION").is_err());
    }
}
