use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::{ExchangeError, Result};
use crate::gateway::{ContractGateway, ContractKind};
use crate::model::{ExchangeConfiguration, PolicyRule};
use crate::{NegotiationId, OfferingId, ParticipantId};

/// Reload-and-retry budget for optimistic writes. A lost race reruns the
/// guard against fresh state, so stale checks can never commit.
const MAX_WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExchangeRequest {
    pub provider: ParticipantId,
    pub consumer: ParticipantId,
    pub provider_service_offering: OfferingId,
    pub consumer_service_offering: OfferingId,
}

/// Drives the bilateral negotiation state machine, sequencing the pure
/// aggregate transitions with contract gateway calls and optimistic
/// persistence. Gateway failures on this flow surface as conflicts and
/// never commit the associated transition.
#[derive(Clone)]
pub struct NegotiationService {
    db: Database,
    gateway: Arc<dyn ContractGateway>,
}

impl NegotiationService {
    pub fn new(db: Database, gateway: Arc<dyn ContractGateway>) -> Self {
        Self { db, gateway }
    }

    pub async fn create(&self, request: CreateExchangeRequest) -> Result<ExchangeConfiguration> {
        if let Some(existing) = self
            .db
            .find_negotiation_by_pairing(
                request.provider,
                request.provider_service_offering,
                request.consumer,
                request.consumer_service_offering,
            )
            .await?
        {
            return Err(ExchangeError::DuplicateNegotiation {
                existing: existing.id,
            });
        }

        let config = ExchangeConfiguration::new(
            request.provider,
            request.consumer,
            request.provider_service_offering,
            request.consumer_service_offering,
        );

        match self.db.create_negotiation(&config).await {
            Ok(()) => {}
            // Two simultaneous creates can both pass the lookup; the unique
            // pairing index decides, and the loser reports the winner's id.
            Err(ExchangeError::Database(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                let existing = self
                    .db
                    .find_negotiation_by_pairing(
                        request.provider,
                        request.provider_service_offering,
                        request.consumer,
                        request.consumer_service_offering,
                    )
                    .await?
                    .ok_or(ExchangeError::NotFound("exchange configuration"))?;
                return Err(ExchangeError::DuplicateNegotiation {
                    existing: existing.id,
                });
            }
            Err(err) => return Err(err),
        }

        tracing::info!(negotiation = %config.id, "exchange configuration requested");
        Ok(config)
    }

    pub async fn get(&self, id: NegotiationId) -> Result<ExchangeConfiguration> {
        self.db
            .get_negotiation(id)
            .await?
            .ok_or(ExchangeError::NotFound("exchange configuration"))
    }

    pub async fn list_for(&self, participant: ParticipantId) -> Result<Vec<ExchangeConfiguration>> {
        self.db.list_negotiations_for(participant).await
    }

    /// Provider authorization. The backing contract is generated before the
    /// transition is committed; a gateway failure aborts the whole attempt
    /// and the configuration stays `Requested`.
    pub async fn authorize(
        &self,
        id: NegotiationId,
        caller: ParticipantId,
        policies: Vec<PolicyRule>,
    ) -> Result<ExchangeConfiguration> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut config = self.get(id).await?;
            config.authorize(caller, policies.clone())?;

            let contract = self
                .gateway
                .generate(ContractKind::Bilateral, config.id, caller, None)
                .await
                .map_err(|err| {
                    ExchangeError::Conflict(format!("failed to generate contract: {err}"))
                })?;
            config.contract_id = Some(contract.id.clone());

            if self.db.update_negotiation(&config).await? {
                config.version += 1;
                tracing::info!(negotiation = %config.id, contract = %contract.id, "negotiation authorized");
                return Ok(config);
            }

            // Lost the write race; the generated contract is orphaned, so
            // clean it up before rerunning the guard on fresh state.
            let _ = self
                .gateway
                .delete(ContractKind::Bilateral, &contract.id)
                .await;
        }

        Err(ExchangeError::Conflict(
            "concurrent update on exchange configuration, please retry".to_string(),
        ))
    }

    pub async fn accept(
        &self,
        id: NegotiationId,
        caller: ParticipantId,
    ) -> Result<ExchangeConfiguration> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut config = self.get(id).await?;
            config.accept(caller)?;

            if self.db.update_negotiation(&config).await? {
                config.version += 1;
                tracing::info!(negotiation = %config.id, "negotiation accepted, ready for signatures");
                return Ok(config);
            }
        }

        Err(ExchangeError::Conflict(
            "concurrent update on exchange configuration, please retry".to_string(),
        ))
    }

    pub async fn negotiate(
        &self,
        id: NegotiationId,
        caller: ParticipantId,
        policies: Vec<PolicyRule>,
    ) -> Result<ExchangeConfiguration> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut config = self.get(id).await?;
            config.negotiate(caller, policies.clone())?;

            if self.db.update_negotiation(&config).await? {
                config.version += 1;
                tracing::info!(negotiation = %config.id, negotiator = %caller, "policy counter-proposal recorded");
                return Ok(config);
            }
        }

        Err(ExchangeError::Conflict(
            "concurrent update on exchange configuration, please retry".to_string(),
        ))
    }

    /// Party signature. The gateway records the signature first; on the
    /// closing signature the negotiated policies are injected into the
    /// contract. Any gateway failure leaves the domain state untouched.
    pub async fn sign(
        &self,
        id: NegotiationId,
        caller: ParticipantId,
        signature: &str,
    ) -> Result<ExchangeConfiguration> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut config = self.get(id).await?;
            let both_signed = config.record_signature(caller, signature)?;

            let contract_id = config
                .contract_id
                .clone()
                .ok_or(ExchangeError::MissingContract)?;
            let role = if caller == config.provider {
                "provider"
            } else {
                "consumer"
            };

            self.gateway
                .sign(ContractKind::Bilateral, &contract_id, caller, signature, role)
                .await
                .map_err(|err| ExchangeError::Conflict(format!("failed to sign contract: {err}")))?;

            if both_signed {
                self.gateway
                    .inject_policies(ContractKind::Bilateral, &contract_id, &config.provider_policies)
                    .await
                    .map_err(|err| {
                        ExchangeError::Conflict(format!(
                            "failed to inject policies in bilateral contract: {err}"
                        ))
                    })?;
            }

            if self.db.update_negotiation(&config).await? {
                config.version += 1;
                if both_signed {
                    tracing::info!(negotiation = %config.id, "both parties signed, negotiation finalized");
                }
                return Ok(config);
            }
        }

        Err(ExchangeError::Conflict(
            "concurrent update on exchange configuration, please retry".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Contract, GatewayError};
    use crate::model::NegotiationStatus;
    use mockall::mock;
    use tempfile::NamedTempFile;

    mock! {
        pub Gateway {}

        #[async_trait::async_trait]
        impl ContractGateway for Gateway {
            async fn generate<'a>(
                &self,
                kind: ContractKind,
                subject: uuid::Uuid,
                initiator: ParticipantId,
                role: Option<&'a str>,
            ) -> std::result::Result<Contract, GatewayError>;

            async fn get_by_id(
                &self,
                kind: ContractKind,
                contract_id: &str,
            ) -> std::result::Result<Contract, GatewayError>;

            async fn sign(
                &self,
                kind: ContractKind,
                contract_id: &str,
                participant: ParticipantId,
                signature: &str,
                role: &str,
            ) -> std::result::Result<Contract, GatewayError>;

            async fn inject_policies(
                &self,
                kind: ContractKind,
                contract_id: &str,
                rules: &[PolicyRule],
            ) -> std::result::Result<Contract, GatewayError>;

            async fn inject_role_obligations(
                &self,
                kind: ContractKind,
                contract_id: &str,
                obligations: &[crate::model::RoleObligation],
            ) -> std::result::Result<Contract, GatewayError>;

            async fn delete(
                &self,
                kind: ContractKind,
                contract_id: &str,
            ) -> std::result::Result<(), GatewayError>;
        }
    }

    async fn temp_database() -> (Database, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let url = format!("sqlite://{}", file.path().to_string_lossy());
        (Database::new(&url).await.unwrap(), file)
    }

    fn sample_request() -> CreateExchangeRequest {
        CreateExchangeRequest {
            provider: uuid::Uuid::new_v4(),
            consumer: uuid::Uuid::new_v4(),
            provider_service_offering: uuid::Uuid::new_v4(),
            consumer_service_offering: uuid::Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn authorize_is_not_committed_when_contract_generation_fails() {
        let (db, _file) = temp_database().await;
        let mut gateway = MockGateway::new();
        gateway.expect_generate().returning(|_, _, _, _| {
            Err(GatewayError::Unavailable {
                status: Some(500),
                message: "down".to_string(),
            })
        });

        let service = NegotiationService::new(db.clone(), Arc::new(gateway));
        let request = sample_request();
        let provider = request.provider;
        let created = service.create(request).await.unwrap();

        let err = service.authorize(created.id, provider, vec![]).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Conflict(_)));

        let stored = service.get(created.id).await.unwrap();
        assert_eq!(stored.negotiation_status, NegotiationStatus::Requested);
        assert!(stored.contract_id.is_none());
    }

    #[tokio::test]
    async fn closing_signature_is_not_committed_when_injection_fails() {
        let (db, _file) = temp_database().await;
        let mut gateway = MockGateway::new();
        gateway.expect_generate().returning(|_, _, _, _| {
            Ok(Contract {
                id: "ctr-000001".to_string(),
                status: "pending".to_string(),
                policy: vec![],
                signatures: vec![],
                members: vec![],
                roles_and_obligations: vec![],
            })
        });
        gateway.expect_sign().returning(|_, contract_id, _, _, _| {
            Ok(Contract {
                id: contract_id.to_string(),
                status: "pending".to_string(),
                policy: vec![],
                signatures: vec![],
                members: vec![],
                roles_and_obligations: vec![],
            })
        });
        gateway.expect_inject_policies().returning(|_, _, _| {
            Err(GatewayError::Unavailable {
                status: Some(500),
                message: "down".to_string(),
            })
        });

        let service = NegotiationService::new(db.clone(), Arc::new(gateway));
        let request = sample_request();
        let (provider, consumer) = (request.provider, request.consumer);
        let created = service.create(request).await.unwrap();

        service.authorize(created.id, provider, vec![]).await.unwrap();
        service.accept(created.id, consumer).await.unwrap();
        service.sign(created.id, provider, "sig-p").await.unwrap();

        let err = service.sign(created.id, consumer, "sig-c").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Conflict(_)));

        // The failed closing signature was not persisted.
        let stored = service.get(created.id).await.unwrap();
        assert_eq!(stored.negotiation_status, NegotiationStatus::SignatureReady);
        assert!(stored.signatures.consumer.is_none());
        assert!(stored.signatures.provider.is_some());
    }
}
