use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::model::{PolicyRule, RoleObligation};
use crate::{ContractId, ParticipantId};

/// Bilateral contracts and multi-party ecosystem contracts live in separate
/// id spaces on the contract service but share the same operation shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Bilateral,
    Ecosystem,
}

impl ContractKind {
    fn path(&self) -> &'static str {
        match self {
            ContractKind::Bilateral => "bilaterals",
            ContractKind::Ecosystem => "contracts",
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("contract service unavailable ({status:?}): {message}")]
    Unavailable { status: Option<u16>, message: String },

    #[error("contract {0} not found")]
    NotFound(ContractId),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Unavailable {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Contract resource as returned by the contract service. Policy, signature
/// and obligation payloads are opaque to the engine and carried as raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    #[serde(rename = "_id")]
    pub id: ContractId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub policy: Vec<Value>,
    #[serde(default)]
    pub signatures: Vec<Value>,
    #[serde(default)]
    pub members: Vec<Value>,
    #[serde(default, rename = "rolesAndObligations")]
    pub roles_and_obligations: Vec<Value>,
}

/// Narrow abstraction over the external contract service. Implementations
/// are injected into the negotiation and ecosystem services so tests can
/// swap in a deterministic fake.
#[async_trait]
pub trait ContractGateway: Send + Sync {
    /// Create the backing contract for a negotiation or ecosystem.
    async fn generate<'a>(
        &self,
        kind: ContractKind,
        subject: uuid::Uuid,
        initiator: ParticipantId,
        role: Option<&'a str>,
    ) -> Result<Contract, GatewayError>;

    async fn get_by_id(
        &self,
        kind: ContractKind,
        contract_id: &str,
    ) -> Result<Contract, GatewayError>;

    /// Record a party's signature. Signatures are opaque tokens; the
    /// contract service is the source of truth for who has signed.
    async fn sign(
        &self,
        kind: ContractKind,
        contract_id: &str,
        participant: ParticipantId,
        signature: &str,
        role: &str,
    ) -> Result<Contract, GatewayError>;

    async fn inject_policies(
        &self,
        kind: ContractKind,
        contract_id: &str,
        rules: &[PolicyRule],
    ) -> Result<Contract, GatewayError>;

    async fn inject_role_obligations(
        &self,
        kind: ContractKind,
        contract_id: &str,
        obligations: &[RoleObligation],
    ) -> Result<Contract, GatewayError>;

    async fn delete(&self, kind: ContractKind, contract_id: &str) -> Result<(), GatewayError>;
}

/// HTTP client for the contract service. All calls carry a bounded timeout;
/// a timed-out call is reported as `Unavailable`, never as success.
pub struct HttpContractGateway {
    client: Client,
    base_url: String,
}

impl HttpContractGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::ExchangeError::Config(format!("gateway client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, kind: ContractKind, suffix: &str) -> String {
        format!("{}/{}{}", self.base_url, kind.path(), suffix)
    }

    /// Some contract service responses wrap the resource as `{ "contract": ... }`,
    /// others return it bare. Accept both.
    async fn parse_contract(
        response: reqwest::Response,
        contract_id: &str,
    ) -> Result<Contract, GatewayError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(contract_id.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Unavailable {
                status: Some(status.as_u16()),
                message,
            });
        }

        let value: Value = response.json().await?;
        let value = value.get("contract").cloned().unwrap_or(value);
        serde_json::from_value(value).map_err(|e| GatewayError::Unavailable {
            status: None,
            message: format!("malformed contract payload: {e}"),
        })
    }
}

#[async_trait]
impl ContractGateway for HttpContractGateway {
    async fn generate<'a>(
        &self,
        kind: ContractKind,
        subject: uuid::Uuid,
        initiator: ParticipantId,
        role: Option<&'a str>,
    ) -> Result<Contract, GatewayError> {
        let body = json!({
            "contract": { "subject": subject, "initiator": initiator },
            "role": role,
        });

        let response = self
            .client
            .post(self.url(kind, ""))
            .json(&body)
            .send()
            .await?;

        Self::parse_contract(response, "").await
    }

    async fn get_by_id(
        &self,
        kind: ContractKind,
        contract_id: &str,
    ) -> Result<Contract, GatewayError> {
        let response = self
            .client
            .get(self.url(kind, &format!("/{contract_id}")))
            .send()
            .await?;

        Self::parse_contract(response, contract_id).await
    }

    async fn sign(
        &self,
        kind: ContractKind,
        contract_id: &str,
        participant: ParticipantId,
        signature: &str,
        role: &str,
    ) -> Result<Contract, GatewayError> {
        let body = json!({
            "participant": participant,
            "signature": signature,
            "role": role,
        });

        let response = self
            .client
            .put(self.url(kind, &format!("/sign/{contract_id}")))
            .json(&body)
            .send()
            .await?;

        Self::parse_contract(response, contract_id).await
    }

    async fn inject_policies(
        &self,
        kind: ContractKind,
        contract_id: &str,
        rules: &[PolicyRule],
    ) -> Result<Contract, GatewayError> {
        let response = self
            .client
            .put(self.url(kind, &format!("/policies/{contract_id}")))
            .json(rules)
            .send()
            .await?;

        Self::parse_contract(response, contract_id).await
    }

    async fn inject_role_obligations(
        &self,
        kind: ContractKind,
        contract_id: &str,
        obligations: &[RoleObligation],
    ) -> Result<Contract, GatewayError> {
        let response = self
            .client
            .put(self.url(kind, &format!("/policies/{contract_id}")))
            .json(obligations)
            .send()
            .await?;

        Self::parse_contract(response, contract_id).await
    }

    async fn delete(&self, kind: ContractKind, contract_id: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(self.url(kind, &format!("/{contract_id}")))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(contract_id.to_string()));
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable {
                status: Some(status.as_u16()),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// In-process stand-in for the contract service, used in tests and local
/// development. Availability is switched per instance, so parallel tests
/// with separate gateways never interfere.
pub struct InMemoryContractGateway {
    contracts: Mutex<HashMap<(ContractKind, ContractId), Contract>>,
    available: AtomicBool,
    counter: AtomicU64,
}

impl Default for InMemoryContractGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContractGateway {
    pub fn new() -> Self {
        Self {
            contracts: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            counter: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Unavailable {
                status: Some(500),
                message: "contract service unavailable".to_string(),
            })
        }
    }

    fn signed_status(kind: ContractKind, contract: &Contract) -> &'static str {
        let complete = match kind {
            ContractKind::Bilateral => contract.signatures.len() >= 2,
            ContractKind::Ecosystem => {
                let has_orchestrator = contract
                    .signatures
                    .iter()
                    .any(|s| s.get("role").and_then(Value::as_str) == Some("orchestrator"));
                has_orchestrator && contract.signatures.len() >= 2
            }
        };
        if complete {
            "signed"
        } else {
            "pending"
        }
    }
}

#[async_trait]
impl ContractGateway for InMemoryContractGateway {
    async fn generate<'a>(
        &self,
        kind: ContractKind,
        subject: uuid::Uuid,
        initiator: ParticipantId,
        role: Option<&'a str>,
    ) -> Result<Contract, GatewayError> {
        self.check_available()?;

        let id = format!("ctr-{:06}", self.counter.fetch_add(1, Ordering::SeqCst));
        let contract = Contract {
            id: id.clone(),
            status: "pending".to_string(),
            policy: vec![],
            signatures: vec![],
            members: vec![json!({ "participant": initiator, "subject": subject })],
            roles_and_obligations: role
                .map(|r| vec![json!({ "role": r, "policies": [] })])
                .unwrap_or_default(),
        };

        self.contracts.lock().insert((kind, id), contract.clone());
        Ok(contract)
    }

    async fn get_by_id(
        &self,
        kind: ContractKind,
        contract_id: &str,
    ) -> Result<Contract, GatewayError> {
        self.check_available()?;
        self.contracts
            .lock()
            .get(&(kind, contract_id.to_string()))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(contract_id.to_string()))
    }

    async fn sign(
        &self,
        kind: ContractKind,
        contract_id: &str,
        participant: ParticipantId,
        signature: &str,
        role: &str,
    ) -> Result<Contract, GatewayError> {
        self.check_available()?;

        let mut contracts = self.contracts.lock();
        let contract = contracts
            .get_mut(&(kind, contract_id.to_string()))
            .ok_or_else(|| GatewayError::NotFound(contract_id.to_string()))?;

        let entry = json!({ "participant": participant, "signature": signature, "role": role });
        let existing = contract.signatures.iter_mut().find(|s| {
            s.get("participant").and_then(Value::as_str) == Some(participant.to_string().as_str())
        });
        match existing {
            Some(slot) => *slot = entry,
            None => contract.signatures.push(entry),
        }
        contract.status = Self::signed_status(kind, contract).to_string();

        Ok(contract.clone())
    }

    async fn inject_policies(
        &self,
        kind: ContractKind,
        contract_id: &str,
        rules: &[PolicyRule],
    ) -> Result<Contract, GatewayError> {
        self.check_available()?;

        let mut contracts = self.contracts.lock();
        let contract = contracts
            .get_mut(&(kind, contract_id.to_string()))
            .ok_or_else(|| GatewayError::NotFound(contract_id.to_string()))?;

        for rule in rules {
            contract
                .policy
                .push(json!({ "ruleId": rule.rule_id, "values": rule.values }));
        }
        Ok(contract.clone())
    }

    async fn inject_role_obligations(
        &self,
        kind: ContractKind,
        contract_id: &str,
        obligations: &[RoleObligation],
    ) -> Result<Contract, GatewayError> {
        self.check_available()?;

        let mut contracts = self.contracts.lock();
        let contract = contracts
            .get_mut(&(kind, contract_id.to_string()))
            .ok_or_else(|| GatewayError::NotFound(contract_id.to_string()))?;

        for obligation in obligations {
            contract.roles_and_obligations.push(json!({
                "role": obligation.role,
                "policies": obligation.policies,
            }));
        }
        Ok(contract.clone())
    }

    async fn delete(&self, kind: ContractKind, contract_id: &str) -> Result<(), GatewayError> {
        self.check_available()?;
        self.contracts
            .lock()
            .remove(&(kind, contract_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(contract_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_gateway_signs_bilateral_contract() {
        let gateway = InMemoryContractGateway::new();
        let subject = uuid::Uuid::new_v4();
        let provider = uuid::Uuid::new_v4();
        let consumer = uuid::Uuid::new_v4();

        let contract = gateway
            .generate(ContractKind::Bilateral, subject, provider, None)
            .await
            .unwrap();
        assert_eq!(contract.status, "pending");

        gateway
            .sign(ContractKind::Bilateral, &contract.id, provider, "sig-a", "provider")
            .await
            .unwrap();
        let contract = gateway
            .sign(ContractKind::Bilateral, &contract.id, consumer, "sig-b", "consumer")
            .await
            .unwrap();
        assert_eq!(contract.status, "signed");
    }

    #[tokio::test]
    async fn unavailable_gateway_rejects_all_calls() {
        let gateway = InMemoryContractGateway::new();
        gateway.set_available(false);

        let err = gateway
            .generate(
                ContractKind::Ecosystem,
                uuid::Uuid::new_v4(),
                uuid::Uuid::new_v4(),
                Some("orchestrator"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn missing_contract_is_not_found() {
        let gateway = InMemoryContractGateway::new();
        let err = gateway
            .get_by_id(ContractKind::Ecosystem, "ctr-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }
}
