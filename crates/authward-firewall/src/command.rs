//! Generic back-end that shells out to user-supplied commands.
//!
//! Each operation runs its command through `sh -c` with the context in the
//! environment: `SSHG_ADDR` (address, or comma list for batches),
//! `SSHG_ADDRKIND` (4 or 6), `SSHG_SERVICE` (service code). Exit 0 means
//! success. An operation with no command configured is unsupported.

use std::process::Command;

use tracing::debug;

use authward_core::{Addr, Service};

use crate::{Firewall, FwError, FwResult};

const ENV_ADDR: &str = "SSHG_ADDR";
const ENV_ADDRKIND: &str = "SSHG_ADDRKIND";
const ENV_SERVICE: &str = "SSHG_SERVICE";

/// Shell commands for each firewall operation; `None` = unsupported.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub init: Option<String>,
    pub finalize: Option<String>,
    pub block: Option<String>,
    pub block_batch: Option<String>,
    pub release: Option<String>,
    pub flush: Option<String>,
}

pub struct CommandFirewall {
    spec: CommandSpec,
}

impl CommandFirewall {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    fn run(&self, what: &Option<String>, env: Option<(String, u32, u32)>) -> FwResult {
        let Some(cmdline) = what else {
            return Err(FwError::Unsupported);
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(cmdline);
        if let Some((addr, kind, service)) = env {
            cmd.env(ENV_ADDR, addr)
                .env(ENV_ADDRKIND, kind.to_string())
                .env(ENV_SERVICE, service.to_string());
        }

        debug!(command = %cmdline, "running firewall command");
        let status = cmd
            .status()
            .map_err(|e| FwError::Failed(format!("cannot run '{cmdline}': {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(FwError::Failed(format!(
                "'{cmdline}' exited with {}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}

impl Firewall for CommandFirewall {
    fn init(&self) -> FwResult {
        self.run(&self.spec.init, None)
    }

    fn finalize(&self) -> FwResult {
        self.run(&self.spec.finalize, None)
    }

    fn block(&self, addr: &Addr, service: Service) -> FwResult {
        self.run(
            &self.spec.block,
            Some((addr.to_string(), addr.kind(), service.code())),
        )
    }

    fn block_batch(&self, batch: &[(Addr, Service)]) -> FwResult {
        let Some(first) = batch.first() else {
            return Ok(());
        };

        if self.spec.block_batch.is_none() {
            // Fall back to repeated single blocks.
            let mut failures = 0;
            for (addr, service) in batch {
                if self.block(addr, *service).is_err() {
                    failures += 1;
                }
            }
            return if failures == 0 {
                Ok(())
            } else {
                Err(FwError::Failed(format!(
                    "{failures} of {} block commands failed",
                    batch.len()
                )))
            };
        }

        let list = batch
            .iter()
            .map(|(addr, _)| addr.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.run(
            &self.spec.block_batch,
            Some((list, first.0.kind(), first.1.code())),
        )
    }

    fn release(&self, addr: &Addr, service: Service) -> FwResult {
        self.run(
            &self.spec.release,
            Some((addr.to_string(), addr.kind(), service.code())),
        )
    }

    fn flush_all(&self) -> FwResult {
        self.run(&self.spec.flush, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn addr(s: &str) -> Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_exit_zero_is_ok() {
        let fw = CommandFirewall::new(CommandSpec {
            block: Some("true".to_string()),
            release: Some("true".to_string()),
            ..Default::default()
        });
        assert!(fw.block(&addr("192.0.2.1"), Service::Ssh).is_ok());
        assert!(fw.release(&addr("192.0.2.1"), Service::Ssh).is_ok());
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let fw = CommandFirewall::new(CommandSpec {
            block: Some("exit 3".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            fw.block(&addr("192.0.2.1"), Service::Ssh),
            Err(FwError::Failed(_))
        ));
    }

    #[test]
    fn test_unconfigured_operation_is_unsupported() {
        let fw = CommandFirewall::new(CommandSpec::default());
        assert!(matches!(
            fw.block(&addr("192.0.2.1"), Service::Ssh),
            Err(FwError::Unsupported)
        ));
        assert!(matches!(fw.flush_all(), Err(FwError::Unsupported)));
    }

    #[test]
    fn test_environment_is_populated() {
        let out = tempfile::NamedTempFile::new().unwrap();
        let fw = CommandFirewall::new(CommandSpec {
            block: Some(format!(
                "echo \"$SSHG_ADDR $SSHG_ADDRKIND $SSHG_SERVICE\" > {}",
                out.path().display()
            )),
            ..Default::default()
        });
        fw.block(&addr("203.0.113.5"), Service::Ssh).unwrap();

        let mut written = String::new();
        out.reopen().unwrap().read_to_string(&mut written).unwrap();
        assert_eq!(written.trim(), "203.0.113.5 4 100");
    }

    #[test]
    fn test_batch_uses_comma_list() {
        let out = tempfile::NamedTempFile::new().unwrap();
        let fw = CommandFirewall::new(CommandSpec {
            block_batch: Some(format!(
                "echo \"$SSHG_ADDR $SSHG_ADDRKIND\" > {}",
                out.path().display()
            )),
            ..Default::default()
        });
        fw.block_batch(&[
            (addr("192.0.2.1"), Service::Ssh),
            (addr("192.0.2.2"), Service::Dovecot),
        ])
        .unwrap();

        let mut written = String::new();
        out.reopen().unwrap().read_to_string(&mut written).unwrap();
        assert_eq!(written.trim(), "192.0.2.1,192.0.2.2 4");
    }

    #[test]
    fn test_batch_falls_back_to_single_blocks() {
        let out = tempfile::NamedTempFile::new().unwrap();
        let fw = CommandFirewall::new(CommandSpec {
            block: Some(format!("echo \"$SSHG_ADDR\" >> {}", out.path().display())),
            ..Default::default()
        });
        fw.block_batch(&[
            (addr("192.0.2.1"), Service::Ssh),
            (addr("192.0.2.2"), Service::Ssh),
        ])
        .unwrap();

        let mut written = String::new();
        out.reopen().unwrap().read_to_string(&mut written).unwrap();
        assert_eq!(written.lines().count(), 2);
    }

    #[test]
    fn test_empty_batch_is_ok() {
        let fw = CommandFirewall::new(CommandSpec::default());
        assert!(fw.block_batch(&[]).is_ok());
    }
}
