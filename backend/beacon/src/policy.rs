//! Access policies composed from identity gates.
//!
//! A policy is `open`, or a disjunction of conjunctions written as
//! `admin|trusted` (either) or `admin+trusted` (both). Gate names are
//! `holder`, `admin` and `trusted`.
//!
//! Evaluation fails closed: a gate whose check errors counts as "no". When no
//! clause passes and at least one gate errored, the result is
//! [`BeaconError::Upstream`] instead of [`BeaconError::Forbidden`] so callers
//! can tell "denied" from "could not verify". Malformed input is not an
//! outage: a [`BeaconError::Validation`] from a check is returned as is.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::errors::{BeaconError, Result};
use crate::gateway::IdentityGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    TokenHolder,
    ContractAdmin,
    TrustedIdentity,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenHolder => "holder",
            Self::ContractAdmin => "admin",
            Self::TrustedIdentity => "trusted",
        }
    }
}

impl FromStr for Gate {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "holder" => Ok(Self::TokenHolder),
            "admin" => Ok(Self::ContractAdmin),
            "trusted" => Ok(Self::TrustedIdentity),
            other => Err(BeaconError::Config(format!("unknown gate: {other:?}"))),
        }
    }
}

/// Who is asking, and about which token.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub token_address: Option<&'a str>,
    pub wallet: &'a str,
    pub fid: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    Open,
    /// Allowed if every gate of any one clause passes.
    AnyOf(Vec<Vec<Gate>>),
}

impl Policy {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Decide whether `subject` may proceed.
    pub async fn authorize(&self, gateway: &dyn IdentityGateway, subject: Subject<'_>) -> Result<()> {
        let Self::AnyOf(clauses) = self else {
            return Ok(());
        };

        let mut seen: HashMap<Gate, bool> = HashMap::new();
        let mut upstream_failure = None;

        for clause in clauses {
            let mut passed = true;
            for gate in clause {
                let ok = match seen.get(gate) {
                    Some(ok) => *ok,
                    None => {
                        let ok = match check(gateway, *gate, subject).await {
                            Ok(ok) => ok,
                            Err(e @ BeaconError::Validation(_)) => return Err(e),
                            Err(e) => {
                                warn!("{} check for {} failed: {e}", gate.as_str(), subject.wallet);
                                upstream_failure = Some(e.to_string());
                                false
                            }
                        };
                        seen.insert(*gate, ok);
                        ok
                    }
                };
                if !ok {
                    passed = false;
                    break;
                }
            }
            if passed {
                return Ok(());
            }
        }

        match upstream_failure {
            Some(reason) => Err(BeaconError::Upstream(reason)),
            None => Err(BeaconError::Forbidden(format!(
                "{} does not satisfy policy {self}",
                subject.wallet
            ))),
        }
    }
}

async fn check(gateway: &dyn IdentityGateway, gate: Gate, subject: Subject<'_>) -> Result<bool> {
    match gate {
        Gate::TokenHolder => match subject.token_address {
            Some(token) => gateway.is_token_holder(token, subject.wallet).await,
            None => Ok(false),
        },
        Gate::ContractAdmin => match subject.token_address {
            Some(token) => gateway.is_contract_admin(token, subject.wallet).await,
            None => Ok(false),
        },
        Gate::TrustedIdentity => match subject.fid {
            Some(fid) => gateway.is_trusted_identity(fid).await,
            None => Ok(false),
        },
    }
}

impl FromStr for Policy {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("open") {
            return Ok(Self::Open);
        }

        let clauses = s
            .split('|')
            .map(|clause| clause.split('+').map(Gate::from_str).collect::<Result<Vec<_>>>())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::AnyOf(clauses))
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::AnyOf(clauses) => {
                let rendered: Vec<String> = clauses
                    .iter()
                    .map(|c| c.iter().map(Gate::as_str).collect::<Vec<_>>().join("+"))
                    .collect();
                f.write_str(&rendered.join("|"))
            }
        }
    }
}

/// The policies applied by the HTTP layer.
#[derive(Debug, Clone)]
pub struct AccessPolicies {
    pub create_project: Policy,
    pub submit_question: Policy,
    pub upvote: Policy,
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::gateway::parse_address;

    /// Gateway with canned answers; `None` makes the check fail. With
    /// `strict_addresses` set, on-chain checks reject malformed addresses the
    /// way [`crate::gateway::HttpGateway`] does.
    #[derive(Default)]
    pub(crate) struct StubGateway {
        pub holder: Option<bool>,
        pub admin: Option<bool>,
        pub trusted: Option<bool>,
        pub strict_addresses: bool,
        pub calls: AtomicUsize,
    }

    impl StubGateway {
        pub(crate) fn new(holder: Option<bool>, admin: Option<bool>, trusted: Option<bool>) -> Self {
            Self {
                holder,
                admin,
                trusted,
                strict_addresses: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn strict(mut self) -> Self {
            self.strict_addresses = true;
            self
        }

        fn check_addresses(&self, token: &str, wallet: &str) -> Result<()> {
            if self.strict_addresses {
                parse_address(token)?;
                parse_address(wallet)?;
            }
            Ok(())
        }

        fn answer(&self, value: Option<bool>) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            value.ok_or_else(|| BeaconError::Upstream("stub outage".to_string()))
        }
    }

    #[async_trait]
    impl IdentityGateway for StubGateway {
        async fn token_balance(&self, token: &str, wallet: &str) -> Result<String> {
            self.check_addresses(token, wallet)?;
            let holder = self.answer(self.holder)?;
            Ok(if holder { "1000000" } else { "0" }.to_string())
        }

        async fn is_contract_admin(&self, token: &str, wallet: &str) -> Result<bool> {
            self.check_addresses(token, wallet)?;
            self.answer(self.admin)
        }

        async fn is_trusted_identity(&self, _fid: u64) -> Result<bool> {
            self.answer(self.trusted)
        }
    }

    fn subject() -> Subject<'static> {
        Subject {
            token_address: Some("0xtoken"),
            wallet: "0xwallet",
            fid: Some(3),
        }
    }

    fn policy(s: &str) -> Policy {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(policy("open"), Policy::Open);
        assert_eq!(policy("admin"), Policy::AnyOf(vec![vec![Gate::ContractAdmin]]));
        assert_eq!(
            policy("holder | admin+trusted"),
            Policy::AnyOf(vec![
                vec![Gate::TokenHolder],
                vec![Gate::ContractAdmin, Gate::TrustedIdentity],
            ])
        );
        assert_eq!(policy("holder|admin+trusted").to_string(), "holder|admin+trusted");
        assert!("owner".parse::<Policy>().is_err());
        assert!("admin|".parse::<Policy>().is_err());
    }

    #[tokio::test]
    async fn open_never_consults_gateway() {
        let gw = StubGateway::default();
        Policy::Open.authorize(&gw, subject()).await.unwrap();
        assert_eq!(gw.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn any_of_allows_on_second_gate() {
        let gw = StubGateway::new(Some(false), Some(true), None);
        policy("holder|admin").authorize(&gw, subject()).await.unwrap();
    }

    #[tokio::test]
    async fn all_of_needs_every_gate() {
        let gw = StubGateway::new(None, Some(true), Some(false));
        let err = policy("admin+trusted").authorize(&gw, subject()).await.unwrap_err();
        assert!(matches!(err, BeaconError::Forbidden(_)));
    }

    #[tokio::test]
    async fn gateway_failure_never_grants() {
        let gw = StubGateway::new(None, None, None);
        let err = policy("holder|admin").authorize(&gw, subject()).await.unwrap_err();
        assert!(matches!(err, BeaconError::Upstream(_)));
    }

    #[tokio::test]
    async fn failure_is_ignored_when_another_clause_passes() {
        let gw = StubGateway::new(None, Some(true), None);
        policy("holder|admin").authorize(&gw, subject()).await.unwrap();
    }

    #[tokio::test]
    async fn malformed_address_is_a_validation_error() {
        let gw = StubGateway::new(Some(true), Some(true), None).strict();
        let err = policy("admin|holder").authorize(&gw, subject()).await.unwrap_err();
        assert!(matches!(err, BeaconError::Validation(_)), "got {err:?}");

        let well_formed = Subject {
            token_address: Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            wallet: "0x00000000000000000000000000000000DeaDBeef",
            fid: None,
        };
        policy("admin").authorize(&gw, well_formed).await.unwrap();
    }

    #[tokio::test]
    async fn each_gate_checked_once() {
        let gw = StubGateway::new(Some(false), Some(true), Some(false));
        let err = policy("holder+admin|holder+trusted|trusted")
            .authorize(&gw, subject())
            .await
            .unwrap_err();
        assert!(matches!(err, BeaconError::Forbidden(_)));
        assert_eq!(gw.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_subject_fields_deny() {
        let gw = StubGateway::new(Some(true), Some(true), Some(true));
        let anonymous = Subject {
            token_address: None,
            wallet: "0xwallet",
            fid: None,
        };
        let err = policy("holder|admin|trusted")
            .authorize(&gw, anonymous)
            .await
            .unwrap_err();
        assert!(matches!(err, BeaconError::Forbidden(_)));
        assert_eq!(gw.calls.load(Ordering::SeqCst), 0);
    }
}
