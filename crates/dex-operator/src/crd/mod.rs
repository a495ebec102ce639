//! Custom resource definitions served under the [`GROUP`] API group, plus helpers to render them
//! as YAML for installation.
use std::io::Write;

use snafu::{ResultExt, Snafu};

pub mod v1;

/// The API group of all custom resources managed by this operator.
pub const GROUP: &str = "dex.betssongroup.com";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize CRD as YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to write CRD YAML schema to stdout"))]
    WriteToStdout { source: std::io::Error },
}

/// Provides YAML schema generation and output for the custom resources of this operator.
pub trait CustomResourceExt: kube::CustomResourceExt {
    /// Generates the YAML schema of the `CustomResourceDefinition` as an explicit document with
    /// leading dashes (`---`).
    fn yaml_schema() -> Result<String> {
        let yaml = serde_yaml::to_string(&Self::crd()).context(SerializeYamlSnafu)?;
        Ok(format!("---\n{yaml}"))
    }

    /// Generates the YAML schema of the `CustomResourceDefinition` and prints it to [stdout].
    ///
    /// [stdout]: std::io::stdout
    fn print_yaml_schema() -> Result<()> {
        let yaml = Self::yaml_schema()?;
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(yaml.as_bytes())
            .context(WriteToStdoutSnafu)
    }
}

impl<T> CustomResourceExt for T where T: kube::CustomResourceExt {}

#[cfg(test)]
mod tests {
    use super::{CustomResourceExt, v1};

    #[test]
    fn client_schema_is_an_explicit_document() {
        let yaml = v1::Client::yaml_schema().expect("Client CRD must serialize");

        assert!(yaml.starts_with("---\n"));
        assert!(yaml.contains("name: clients.dex.betssongroup.com"));
        assert!(yaml.contains("redirectURIs"));
        assert!(yaml.contains("logoURL"));
    }

    #[test]
    fn albauth_schema_keeps_the_upstream_kind() {
        let yaml = v1::AlbAuth::yaml_schema().expect("ALBAuth CRD must serialize");

        assert!(yaml.contains("kind: ALBAuth"));
        assert!(yaml.contains("name: albauths.dex.betssongroup.com"));
        assert!(yaml.contains("issuer"));
    }
}
