//! protocol coordinator: the credential-gated share lifecycle
//!
//! three run-to-completion operations over a [`SealedApi`] and a
//! [`ShareVault`]:
//!
//! - init: obtain N shares + root token, seal each share behind one
//!   physical authentication event, persist record and key only after every
//!   share stored
//! - unseal: submit shares one gated event at a time until the vault
//!   reports unsealed or the record is exhausted
//! - generate-root: nonce-scoped multi-round submission, with a mandatory
//!   cancel of the remote attempt on every failure path
//!
//! no state persists across invocations beyond the key file, the record and
//! the physical media.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::codec::ShareKey;
use crate::factor::ShareVault;
use crate::remote::SealedApi;
use crate::{Error, Result};

/// terminal state of an unseal run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsealOutcome {
    Unsealed { submissions: usize },
    /// every share in the record was attempted without reaching quorum
    ExhaustedNoQuorum { attempted: usize, failed: usize },
}

/// result of a completed root generation ceremony.
///
/// the otp never travels with the shares; it is combined with the encoded
/// token out-of-band to decode the new root token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedRoot {
    pub encoded_token: String,
    pub otp: String,
}

pub struct Coordinator<A: SealedApi, V: ShareVault> {
    api: A,
    vault: V,
    key_path: PathBuf,
}

impl<A: SealedApi, V: ShareVault> Coordinator<A, V> {
    pub fn new(api: A, vault: V, key_path: &Path) -> Self {
        Self {
            api,
            vault,
            key_path: key_path.to_path_buf(),
        }
    }

    /// initialize the vault and seal every returned share behind one
    /// authentication event each.
    ///
    /// any per-share failure aborts the whole run before anything durable
    /// is written: a partial share set can never unseal and must not look
    /// like success. returns the root token, shown to the operator exactly
    /// once - it is not re-derivable later.
    pub fn init(&mut self, key_shares: u32) -> Result<String> {
        // initialization is destructive; gate it on a physical event before
        // touching the remote
        let event = self
            .vault
            .await_event("Present factor to authorize initialization")?;
        info!(key_shares, factor = %event.label, "initializing sealed vault");
        let resp = self.api.init(key_shares)?;
        if resp.keys.len() != key_shares as usize {
            return Err(Error::Protocol(format!(
                "vault returned {} shares, requested {key_shares}",
                resp.keys.len()
            )));
        }

        let key = ShareKey::generate();
        let total = resp.keys.len();
        for (i, share) in resp.keys.iter().enumerate() {
            let event = self
                .vault
                .await_event(&format!("Present factor to store share {}/{total}", i + 1))?;
            info!(share = i + 1, factor = %event.label, "storing sealed share");
            let sealed = key.encrypt(share)?;
            self.vault.store_share(i, &sealed)?;
        }

        // all shares stored; now and only now commit durable state
        self.vault.commit()?;
        key.save(&self.key_path)?;
        self.vault.release();
        Ok(resp.root_token)
    }

    /// submit shares until the vault unseals or the record is exhausted.
    ///
    /// a share that fails to decrypt or submit is skipped, not fatal: the
    /// remaining shares may still reach quorum.
    pub fn unseal(&mut self) -> Result<UnsealOutcome> {
        let key = ShareKey::load(&self.key_path)?;
        let count = self.vault.open()?;
        info!(shares = count, "unsealing");

        let mut submissions = 0;
        let mut failed = 0;
        for i in 0..count {
            let event = self
                .vault
                .await_event(&format!("Present factor for share {}/{count}", i + 1))?;
            info!(share = i + 1, factor = %event.label, "submitting share");

            let share = match self.vault.load_share(i).and_then(|ct| key.decrypt(&ct)) {
                Ok(share) => share,
                Err(e) => {
                    warn!(share = i + 1, error = %e, "share unusable, skipping");
                    failed += 1;
                    continue;
                }
            };

            match self.api.submit_unseal_share(&share) {
                Ok(status) => {
                    submissions += 1;
                    if !status.sealed {
                        info!(submissions, "vault is unsealed");
                        self.vault.release();
                        return Ok(UnsealOutcome::Unsealed { submissions });
                    }
                }
                Err(e) => {
                    warn!(share = i + 1, error = %e, "submission failed, skipping");
                    failed += 1;
                }
            }
        }

        warn!(attempted = count, failed, "quorum not reached");
        self.vault.release();
        Ok(UnsealOutcome::ExhaustedNoQuorum {
            attempted: count,
            failed,
        })
    }

    /// run the root token generation ceremony.
    ///
    /// on any failure after the attempt begins, the remote attempt is
    /// cancelled before the error surfaces - a dangling attempt blocks all
    /// future attempts on the vault.
    pub fn generate_root(&mut self) -> Result<GeneratedRoot> {
        let key = ShareKey::load(&self.key_path)?;
        let count = self.vault.open()?;
        let attempt = self.api.begin_root_generation()?;
        info!(shares = count, nonce = %attempt.nonce, "root generation attempt started");

        let result = self.submit_root_rounds(&key, count, &attempt.nonce);
        self.vault.release();
        match result {
            Ok(encoded_token) => Ok(GeneratedRoot {
                encoded_token,
                otp: attempt.otp,
            }),
            Err(e) => {
                warn!(error = %e, "root generation failed, cancelling attempt");
                if let Err(cancel_err) = self.api.cancel_root_generation() {
                    warn!(error = %cancel_err, "cancel of generation attempt failed");
                }
                Err(e)
            }
        }
    }

    fn submit_root_rounds(&mut self, key: &ShareKey, count: usize, nonce: &str) -> Result<String> {
        for i in 0..count {
            let event = self
                .vault
                .await_event(&format!("Present factor for share {}/{count}", i + 1))?;
            info!(share = i + 1, factor = %event.label, "submitting share");

            // a decrypt failure here means systemic corruption, not a
            // skippable share: every remaining round needs this key
            let share = key.decrypt(&self.vault.load_share(i)?)?;
            let progress = self.api.submit_root_share(&share, nonce)?;
            if progress.complete {
                return progress
                    .encoded_root_token
                    .ok_or_else(|| Error::Remote("complete without encoded token".into()));
            }
        }
        Err(Error::Protocol(
            "all shares submitted without completing root generation".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::AuthEvent;
    use crate::remote::{AttemptResponse, InitResponse, UnsealStatus, UpdateResponse};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct StubApi {
        init_response: Option<Result<InitResponse>>,
        unseal_results: VecDeque<Result<UnsealStatus>>,
        attempt_response: Option<Result<AttemptResponse>>,
        update_results: VecDeque<Result<UpdateResponse>>,
        submitted: Vec<String>,
        root_submitted: Vec<(String, String)>,
        cancels: u32,
    }

    impl SealedApi for StubApi {
        fn init(&mut self, _key_shares: u32) -> Result<InitResponse> {
            self.init_response.take().expect("unexpected init call")
        }
        fn submit_unseal_share(&mut self, share: &str) -> Result<UnsealStatus> {
            self.submitted.push(share.to_string());
            self.unseal_results
                .pop_front()
                .expect("unexpected unseal submission")
        }
        fn begin_root_generation(&mut self) -> Result<AttemptResponse> {
            self.attempt_response.take().expect("unexpected attempt")
        }
        fn submit_root_share(&mut self, share: &str, nonce: &str) -> Result<UpdateResponse> {
            self.root_submitted.push((share.into(), nonce.into()));
            self.update_results
                .pop_front()
                .expect("unexpected root submission")
        }
        fn cancel_root_generation(&mut self) -> Result<()> {
            self.cancels += 1;
            Ok(())
        }
    }

    /// in-memory vault with the same commit semantics as the real ones
    #[derive(Default)]
    struct MemVault {
        staged: Vec<String>,
        committed: Option<Vec<String>>,
        on_disk: Option<Vec<String>>,
        record: Option<Vec<String>>,
        events: u32,
        released: u32,
        fail_store_at: Option<usize>,
    }

    impl MemVault {
        fn with_record(record: Vec<String>) -> Self {
            Self {
                on_disk: Some(record),
                ..Default::default()
            }
        }
    }

    impl ShareVault for MemVault {
        fn await_event(&mut self, _prompt: &str) -> Result<AuthEvent> {
            self.events += 1;
            Ok(AuthEvent {
                label: format!("event #{}", self.events),
            })
        }
        fn store_share(&mut self, index: usize, ciphertext: &str) -> Result<()> {
            if self.fail_store_at == Some(index) {
                return Err(Error::Medium {
                    block: 4,
                    reason: "write refused".into(),
                });
            }
            self.staged.push(ciphertext.to_string());
            Ok(())
        }
        fn commit(&mut self) -> Result<()> {
            self.committed = Some(self.staged.clone());
            Ok(())
        }
        fn open(&mut self) -> Result<usize> {
            let record = self
                .on_disk
                .clone()
                .ok_or_else(|| Error::Storage("no record".into()))?;
            let count = record.len();
            self.record = Some(record);
            Ok(count)
        }
        fn load_share(&mut self, index: usize) -> Result<String> {
            Ok(self.record.as_ref().unwrap()[index].clone())
        }
        fn release(&mut self) {
            self.released += 1;
        }
    }

    fn key_file(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("keyfob.key")
    }

    fn seal_record(key: &ShareKey, shares: &[&str]) -> Vec<String> {
        shares.iter().map(|s| key.encrypt(s).unwrap()).collect()
    }

    #[test]
    fn test_init_seals_every_share_then_commits() {
        // scenario A: 3 shares in, 3 sealed entries out, key decrypts all
        let dir = tempfile::tempdir().unwrap();
        let api = StubApi {
            init_response: Some(Ok(InitResponse {
                keys: vec!["k1".into(), "k2".into(), "k3".into()],
                root_token: "s.root".into(),
            })),
            ..Default::default()
        };
        let mut coord = Coordinator::new(api, MemVault::default(), &key_file(&dir));

        let root = coord.init(3).unwrap();
        assert_eq!(root, "s.root");
        // one authorization gate plus one gate per share
        assert_eq!(coord.vault.events, 4);

        let committed = coord.vault.committed.clone().expect("record committed");
        assert_eq!(committed.len(), 3);

        let key = ShareKey::load(&key_file(&dir)).unwrap();
        let plain: Vec<String> = committed.iter().map(|ct| key.decrypt(ct).unwrap()).collect();
        assert_eq!(plain, vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn test_init_share_count_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let api = StubApi {
            init_response: Some(Ok(InitResponse {
                keys: vec!["k1".into(), "k2".into()],
                root_token: "s.root".into(),
            })),
            ..Default::default()
        };
        let mut coord = Coordinator::new(api, MemVault::default(), &key_file(&dir));

        assert!(matches!(coord.init(3), Err(Error::Protocol(_))));
        assert_eq!(coord.vault.events, 1, "only the authorization gate ran");
        assert!(coord.vault.committed.is_none());
        assert!(!key_file(&dir).exists());
    }

    #[test]
    fn test_init_storage_failure_aborts_without_durable_state() {
        let dir = tempfile::tempdir().unwrap();
        let api = StubApi {
            init_response: Some(Ok(InitResponse {
                keys: vec!["k1".into(), "k2".into(), "k3".into()],
                root_token: "s.root".into(),
            })),
            ..Default::default()
        };
        let vault = MemVault {
            fail_store_at: Some(1),
            ..Default::default()
        };
        let mut coord = Coordinator::new(api, vault, &key_file(&dir));

        assert!(matches!(coord.init(3), Err(Error::Medium { .. })));
        assert!(coord.vault.committed.is_none(), "no partial record");
        assert!(!key_file(&dir).exists(), "no key file on abort");
    }

    #[test]
    fn test_unseal_stops_when_vault_reports_unsealed() {
        // scenario B: sealed true, true, false -> exactly 3 submissions
        let dir = tempfile::tempdir().unwrap();
        let key = ShareKey::generate();
        key.save(&key_file(&dir)).unwrap();

        let api = StubApi {
            unseal_results: VecDeque::from([
                Ok(UnsealStatus { sealed: true }),
                Ok(UnsealStatus { sealed: true }),
                Ok(UnsealStatus { sealed: false }),
            ]),
            ..Default::default()
        };
        let vault = MemVault::with_record(seal_record(&key, &["k1", "k2", "k3"]));
        let mut coord = Coordinator::new(api, vault, &key_file(&dir));

        let outcome = coord.unseal().unwrap();
        assert_eq!(outcome, UnsealOutcome::Unsealed { submissions: 3 });
        assert_eq!(coord.api.submitted, vec!["k1", "k2", "k3"]);
        assert_eq!(coord.vault.released, 1);
    }

    #[test]
    fn test_unseal_stops_early_on_quorum() {
        let dir = tempfile::tempdir().unwrap();
        let key = ShareKey::generate();
        key.save(&key_file(&dir)).unwrap();

        let api = StubApi {
            unseal_results: VecDeque::from([Ok(UnsealStatus { sealed: false })]),
            ..Default::default()
        };
        let vault = MemVault::with_record(seal_record(&key, &["k1", "k2", "k3"]));
        let mut coord = Coordinator::new(api, vault, &key_file(&dir));

        let outcome = coord.unseal().unwrap();
        assert_eq!(outcome, UnsealOutcome::Unsealed { submissions: 1 });
        assert_eq!(coord.api.submitted.len(), 1, "no submissions past quorum");
    }

    #[test]
    fn test_unseal_skips_corrupt_share_and_exhausts() {
        // scenario C: entry 2 corrupted, entries 1 and 3 still submitted
        let dir = tempfile::tempdir().unwrap();
        let key = ShareKey::generate();
        key.save(&key_file(&dir)).unwrap();

        let mut record = seal_record(&key, &["k1", "k2", "k3"]);
        record[1] = "corrupted-ciphertext".into();

        let api = StubApi {
            unseal_results: VecDeque::from([
                Ok(UnsealStatus { sealed: true }),
                Ok(UnsealStatus { sealed: true }),
            ]),
            ..Default::default()
        };
        let mut coord = Coordinator::new(api, MemVault::with_record(record), &key_file(&dir));

        let outcome = coord.unseal().unwrap();
        assert_eq!(
            outcome,
            UnsealOutcome::ExhaustedNoQuorum {
                attempted: 3,
                failed: 1
            }
        );
        assert_eq!(coord.api.submitted, vec!["k1", "k3"]);
    }

    #[test]
    fn test_unseal_treats_submit_error_as_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let key = ShareKey::generate();
        key.save(&key_file(&dir)).unwrap();

        let api = StubApi {
            unseal_results: VecDeque::from([
                Err(Error::Remote("connection reset".into())),
                Ok(UnsealStatus { sealed: false }),
            ]),
            ..Default::default()
        };
        let vault = MemVault::with_record(seal_record(&key, &["k1", "k2"]));
        let mut coord = Coordinator::new(api, vault, &key_file(&dir));

        let outcome = coord.unseal().unwrap();
        assert_eq!(outcome, UnsealOutcome::Unsealed { submissions: 1 });
    }

    fn attempt_ok() -> Option<Result<AttemptResponse>> {
        Some(Ok(AttemptResponse {
            nonce: "n1".into(),
            otp: "otp1".into(),
        }))
    }

    #[test]
    fn test_generate_root_completes() {
        let dir = tempfile::tempdir().unwrap();
        let key = ShareKey::generate();
        key.save(&key_file(&dir)).unwrap();

        let api = StubApi {
            attempt_response: attempt_ok(),
            update_results: VecDeque::from([
                Ok(UpdateResponse {
                    complete: false,
                    encoded_root_token: None,
                }),
                Ok(UpdateResponse {
                    complete: true,
                    encoded_root_token: Some("enc.token".into()),
                }),
            ]),
            ..Default::default()
        };
        let vault = MemVault::with_record(seal_record(&key, &["k1", "k2", "k3"]));
        let mut coord = Coordinator::new(api, vault, &key_file(&dir));

        let generated = coord.generate_root().unwrap();
        assert_eq!(generated.encoded_token, "enc.token");
        assert_eq!(generated.otp, "otp1");
        assert_eq!(coord.api.cancels, 0);
        // stops after completion, every round carries the attempt nonce
        assert_eq!(coord.api.root_submitted.len(), 2);
        assert!(coord.api.root_submitted.iter().all(|(_, n)| n == "n1"));
    }

    #[test]
    fn test_generate_root_cancels_once_on_remote_failure() {
        // scenario D: third update call fails -> exactly one cancel
        let dir = tempfile::tempdir().unwrap();
        let key = ShareKey::generate();
        key.save(&key_file(&dir)).unwrap();

        let api = StubApi {
            attempt_response: attempt_ok(),
            update_results: VecDeque::from([
                Ok(UpdateResponse {
                    complete: false,
                    encoded_root_token: None,
                }),
                Ok(UpdateResponse {
                    complete: false,
                    encoded_root_token: None,
                }),
                Err(Error::Remote("connection reset".into())),
            ]),
            ..Default::default()
        };
        let vault = MemVault::with_record(seal_record(&key, &["k1", "k2", "k3"]));
        let mut coord = Coordinator::new(api, vault, &key_file(&dir));

        assert!(matches!(coord.generate_root(), Err(Error::Remote(_))));
        assert_eq!(coord.api.cancels, 1);
    }

    #[test]
    fn test_generate_root_cancels_once_when_shares_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let key = ShareKey::generate();
        key.save(&key_file(&dir)).unwrap();

        let incomplete = || {
            Ok(UpdateResponse {
                complete: false,
                encoded_root_token: None,
            })
        };
        let api = StubApi {
            attempt_response: attempt_ok(),
            update_results: VecDeque::from([incomplete(), incomplete()]),
            ..Default::default()
        };
        let vault = MemVault::with_record(seal_record(&key, &["k1", "k2"]));
        let mut coord = Coordinator::new(api, vault, &key_file(&dir));

        assert!(matches!(coord.generate_root(), Err(Error::Protocol(_))));
        assert_eq!(coord.api.cancels, 1);
    }

    #[test]
    fn test_generate_root_decrypt_failure_is_fatal_and_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let key = ShareKey::generate();
        key.save(&key_file(&dir)).unwrap();

        let mut record = seal_record(&key, &["k1", "k2"]);
        record[0] = "corrupted".into();

        let api = StubApi {
            attempt_response: attempt_ok(),
            ..Default::default()
        };
        let mut coord = Coordinator::new(api, MemVault::with_record(record), &key_file(&dir));

        assert!(matches!(coord.generate_root(), Err(Error::Authentication)));
        assert_eq!(coord.api.cancels, 1);
        assert!(coord.api.root_submitted.is_empty());
    }

    #[test]
    fn test_unseal_without_key_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut coord = Coordinator::new(
            StubApi::default(),
            MemVault::with_record(vec!["ct".into()]),
            &key_file(&dir),
        );
        assert!(matches!(coord.unseal(), Err(Error::Storage(_))));
    }
}
