use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{ExchangeError, Result};
use crate::gateway::{Contract, ContractGateway, ContractKind};
use crate::model::{
    Ecosystem, EcosystemPatch, MembershipEntry, MembershipStatus, OfferingConfiguration,
    ParticipantRoles, RoleObligation,
};
use crate::{EcosystemId, ParticipantId};

const MAX_WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEcosystemRequest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub country_or_region: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub use_cases: Option<Vec<String>>,
    #[serde(default)]
    pub searched_data: Option<Vec<String>>,
    #[serde(default)]
    pub searched_services: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEcosystemRequest {
    #[serde(flatten)]
    pub patch: EcosystemPatch,
    #[serde(default)]
    pub role_assignments: Option<Vec<ParticipantRoles>>,
    #[serde(default)]
    pub roles_and_obligations: Option<Vec<RoleObligation>>,
}

/// Outcome of an operation whose domain state committed but whose contract
/// leg may have failed. The caller decides how loudly to surface the error.
#[derive(Debug)]
pub struct EcosystemOutcome {
    pub ecosystem: Ecosystem,
    pub contract_error: Option<ExchangeError>,
}

/// Coordinates ecosystem membership with the backing multi-party contract.
/// Membership transitions are pure on the aggregate; this service sequences
/// them with gateway calls and optimistic persistence. Unlike the bilateral
/// flow, ecosystem creation is best-effort: the ecosystem is kept even when
/// the contract service is down, and contract generation can be retried.
#[derive(Clone)]
pub struct EcosystemService {
    db: Database,
    gateway: Arc<dyn ContractGateway>,
}

impl EcosystemService {
    pub fn new(db: Database, gateway: Arc<dyn ContractGateway>) -> Self {
        Self { db, gateway }
    }

    async fn load(&self, id: EcosystemId) -> Result<Ecosystem> {
        self.db
            .get_ecosystem(id)
            .await?
            .ok_or(ExchangeError::NotFound("ecosystem"))
    }

    /// Reload-and-retry wrapper for optimistic writes. The mutation reruns
    /// against fresh state after a lost race, so its guards stay valid.
    async fn mutate<T>(
        &self,
        id: EcosystemId,
        mut op: impl FnMut(&mut Ecosystem) -> Result<T>,
    ) -> Result<(Ecosystem, T)> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut ecosystem = self.load(id).await?;
            let outcome = op(&mut ecosystem)?;
            if self.db.update_ecosystem(&ecosystem).await? {
                ecosystem.version += 1;
                return Ok((ecosystem, outcome));
            }
        }
        Err(ExchangeError::Conflict(
            "concurrent update on ecosystem, please retry".to_string(),
        ))
    }

    fn ensure_orchestrator(ecosystem: &Ecosystem, caller: ParticipantId) -> Result<()> {
        if ecosystem.orchestrator != caller {
            return Err(ExchangeError::Ownership(
                "only the ecosystem orchestrator can perform this operation".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates the ecosystem and attempts to generate its contract. The
    /// ecosystem is persisted either way; a gateway failure is reported
    /// alongside the created resource so the contract can be retried later.
    pub async fn create(
        &self,
        orchestrator: ParticipantId,
        request: CreateEcosystemRequest,
    ) -> Result<EcosystemOutcome> {
        let mut ecosystem = Ecosystem::new(orchestrator, request.name, request.description);
        ecosystem.logo = request.logo;
        ecosystem.country_or_region = request.country_or_region;
        ecosystem.target_audience = request.target_audience;
        ecosystem.use_cases = request.use_cases.unwrap_or_default();
        ecosystem.searched_data = request.searched_data.unwrap_or_default();
        ecosystem.searched_services = request.searched_services.unwrap_or_default();

        self.db.create_ecosystem(&ecosystem).await?;
        tracing::info!(ecosystem = %ecosystem.id, %orchestrator, "ecosystem created");

        match self
            .gateway
            .generate(
                ContractKind::Ecosystem,
                ecosystem.id,
                orchestrator,
                Some("orchestrator"),
            )
            .await
        {
            Ok(contract) => {
                let (ecosystem, _) = self
                    .mutate(ecosystem.id, |eco| {
                        eco.contract_id = Some(contract.id.clone());
                        Ok(())
                    })
                    .await?;
                Ok(EcosystemOutcome {
                    ecosystem,
                    contract_error: None,
                })
            }
            Err(err) => {
                tracing::warn!(ecosystem = %ecosystem.id, error = %err, "ecosystem contract generation failed");
                Ok(EcosystemOutcome {
                    ecosystem,
                    contract_error: Some(err.into()),
                })
            }
        }
    }

    pub async fn get(&self, id: EcosystemId) -> Result<Ecosystem> {
        self.load(id).await
    }

    /// Ecosystems where the participant is orchestrator, member, or holds a
    /// live invitation or join request.
    pub async fn list_for(&self, participant: ParticipantId) -> Result<Vec<Ecosystem>> {
        self.db.list_ecosystems_for(participant).await
    }

    /// Ecosystems holding a pending invitation for the participant.
    pub async fn invitations_for(&self, participant: ParticipantId) -> Result<Vec<Ecosystem>> {
        let ecosystems = self.db.list_ecosystems_with_invitation_for(participant).await?;
        Ok(ecosystems
            .into_iter()
            .filter(|eco| {
                eco.invitations
                    .iter()
                    .any(|e| e.participant == participant && e.status == MembershipStatus::Pending)
            })
            .collect())
    }

    /// Metadata update plus optional role reassignment and contract
    /// obligation injection. Field changes always commit; a failed
    /// injection leg is reported alongside the updated resource.
    pub async fn update(
        &self,
        id: EcosystemId,
        caller: ParticipantId,
        request: UpdateEcosystemRequest,
    ) -> Result<EcosystemOutcome> {
        let patch = request.patch;
        let assignments = request.role_assignments.unwrap_or_default();

        let (ecosystem, _) = self
            .mutate(id, |eco| {
                Self::ensure_orchestrator(eco, caller)?;
                eco.apply_patch(patch.clone());
                eco.assign_roles(&assignments);
                Ok(())
            })
            .await?;

        let contract_error = match (&request.roles_and_obligations, &ecosystem.contract_id) {
            (Some(obligations), Some(contract_id)) if !obligations.is_empty() => self
                .gateway
                .inject_role_obligations(ContractKind::Ecosystem, contract_id, obligations)
                .await
                .err()
                .map(|err| {
                    tracing::warn!(ecosystem = %id, error = %err, "role obligation injection failed");
                    err.into()
                }),
            (Some(obligations), None) if !obligations.is_empty() => {
                Some(ExchangeError::MissingContract)
            }
            _ => None,
        };

        Ok(EcosystemOutcome {
            ecosystem,
            contract_error,
        })
    }

    pub async fn delete(&self, id: EcosystemId, caller: ParticipantId) -> Result<()> {
        let ecosystem = self.load(id).await?;
        Self::ensure_orchestrator(&ecosystem, caller)?;

        if let Some(contract_id) = &ecosystem.contract_id {
            // Best effort; an unreachable contract service must not keep a
            // deleted ecosystem alive.
            if let Err(err) = self.gateway.delete(ContractKind::Ecosystem, contract_id).await {
                tracing::warn!(ecosystem = %id, error = %err, "ecosystem contract deletion failed");
            }
        }

        if !self.db.delete_ecosystem(id).await? {
            return Err(ExchangeError::NotFound("ecosystem"));
        }
        tracing::info!(ecosystem = %id, "ecosystem deleted");
        Ok(())
    }

    /// Retries contract generation for an ecosystem created while the
    /// contract service was unreachable.
    pub async fn create_contract(&self, id: EcosystemId, caller: ParticipantId) -> Result<Ecosystem> {
        let ecosystem = self.load(id).await?;
        Self::ensure_orchestrator(&ecosystem, caller)?;
        if ecosystem.contract_id.is_some() {
            return Err(ExchangeError::Conflict(
                "ecosystem already has a contract".to_string(),
            ));
        }

        let contract = self
            .gateway
            .generate(ContractKind::Ecosystem, id, caller, Some("orchestrator"))
            .await?;

        let (ecosystem, _) = self
            .mutate(id, |eco| {
                eco.contract_id = Some(contract.id.clone());
                Ok(())
            })
            .await?;
        tracing::info!(ecosystem = %id, contract = %contract.id, "ecosystem contract generated");
        Ok(ecosystem)
    }

    pub async fn get_contract(&self, id: EcosystemId) -> Result<Contract> {
        let ecosystem = self.load(id).await?;
        let contract_id = ecosystem
            .contract_id
            .ok_or(ExchangeError::MissingContract)?;
        Ok(self
            .gateway
            .get_by_id(ContractKind::Ecosystem, &contract_id)
            .await?)
    }

    pub async fn invite(
        &self,
        id: EcosystemId,
        caller: ParticipantId,
        participant: ParticipantId,
        roles: Vec<String>,
    ) -> Result<MembershipEntry> {
        let (_, entry) = self
            .mutate(id, |eco| {
                Self::ensure_orchestrator(eco, caller)?;
                eco.invite(participant, roles.clone())
            })
            .await?;
        tracing::info!(ecosystem = %id, %participant, "participant invited");
        Ok(entry)
    }

    pub async fn pending_invitations(&self, id: EcosystemId) -> Result<Vec<MembershipEntry>> {
        let ecosystem = self.load(id).await?;
        Ok(ecosystem
            .invitations
            .into_iter()
            .filter(|e| e.status == MembershipStatus::Pending)
            .collect())
    }

    pub async fn accept_invitation(
        &self,
        id: EcosystemId,
        participant: ParticipantId,
    ) -> Result<MembershipEntry> {
        let (_, entry) = self
            .mutate(id, |eco| eco.accept_invitation(participant))
            .await?;
        Ok(entry)
    }

    pub async fn deny_invitation(
        &self,
        id: EcosystemId,
        participant: ParticipantId,
    ) -> Result<MembershipEntry> {
        let (_, entry) = self
            .mutate(id, |eco| eco.deny_invitation(participant))
            .await?;
        Ok(entry)
    }

    pub async fn request_to_join(
        &self,
        id: EcosystemId,
        participant: ParticipantId,
        roles: Vec<String>,
    ) -> Result<MembershipEntry> {
        let (_, entry) = self
            .mutate(id, |eco| eco.request_to_join(participant, roles.clone()))
            .await?;
        tracing::info!(ecosystem = %id, %participant, "join request recorded");
        Ok(entry)
    }

    pub async fn join_requests(
        &self,
        id: EcosystemId,
        status: Option<MembershipStatus>,
    ) -> Result<Vec<MembershipEntry>> {
        let ecosystem = self.load(id).await?;
        Ok(ecosystem
            .join_requests
            .into_iter()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .collect())
    }

    pub async fn authorize_join_request(
        &self,
        id: EcosystemId,
        caller: ParticipantId,
        request_id: Uuid,
    ) -> Result<MembershipEntry> {
        let (_, entry) = self
            .mutate(id, |eco| {
                Self::ensure_orchestrator(eco, caller)?;
                eco.authorize_join_request(request_id, None)
            })
            .await?;
        Ok(entry)
    }

    pub async fn reject_join_request(
        &self,
        id: EcosystemId,
        caller: ParticipantId,
        request_id: Uuid,
    ) -> Result<MembershipEntry> {
        let (_, entry) = self
            .mutate(id, |eco| {
                Self::ensure_orchestrator(eco, caller)?;
                eco.reject_join_request(request_id)
            })
            .await?;
        Ok(entry)
    }

    pub async fn configure_offerings(
        &self,
        id: EcosystemId,
        participant: ParticipantId,
        offerings: Vec<OfferingConfiguration>,
    ) -> Result<Ecosystem> {
        let (ecosystem, _) = self
            .mutate(id, |eco| eco.configure_offerings(participant, offerings.clone()))
            .await?;
        Ok(ecosystem)
    }

    /// Orchestrator signature on the ecosystem contract. The orchestrator is
    /// a member from creation, so only the contract leg runs here.
    pub async fn sign_orchestrator(
        &self,
        id: EcosystemId,
        caller: ParticipantId,
        signature: &str,
    ) -> Result<Contract> {
        let ecosystem = self.load(id).await?;
        Self::ensure_orchestrator(&ecosystem, caller)?;
        let contract_id = ecosystem
            .contract_id
            .ok_or(ExchangeError::MissingContract)?;

        let contract = self
            .gateway
            .sign(ContractKind::Ecosystem, &contract_id, caller, signature, "orchestrator")
            .await?;
        tracing::info!(ecosystem = %id, "orchestrator signed ecosystem contract");
        Ok(contract)
    }

    /// Participant signature. Requires an authorized invitation or join
    /// request; the contract is signed first, and only then is membership
    /// committed. A gateway failure grants nothing.
    pub async fn sign_participant(
        &self,
        id: EcosystemId,
        participant: ParticipantId,
        signature: &str,
    ) -> Result<Ecosystem> {
        let ecosystem = self.load(id).await?;
        let contract_id = ecosystem
            .contract_id
            .clone()
            .ok_or(ExchangeError::MissingContract)?;
        if !ecosystem.has_authorized_entry(participant) {
            return Err(ExchangeError::UnauthorizedParticipant);
        }

        self.gateway
            .sign(ContractKind::Ecosystem, &contract_id, participant, signature, "participant")
            .await?;

        let (ecosystem, _) = self
            .mutate(id, |eco| eco.promote_signer(participant))
            .await?;
        tracing::info!(ecosystem = %id, %participant, "participant signed and joined ecosystem");
        Ok(ecosystem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryContractGateway;
    use tempfile::NamedTempFile;

    async fn setup() -> (EcosystemService, Arc<InMemoryContractGateway>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let url = format!("sqlite://{}", file.path().to_string_lossy());
        let db = Database::new(&url).await.unwrap();
        let gateway = Arc::new(InMemoryContractGateway::new());
        (EcosystemService::new(db, gateway.clone()), gateway, file)
    }

    fn sample_request() -> CreateEcosystemRequest {
        CreateEcosystemRequest {
            name: "energy dataspace".to_string(),
            description: "grid telemetry sharing".to_string(),
            logo: None,
            country_or_region: Some("EU".to_string()),
            target_audience: None,
            use_cases: None,
            searched_data: None,
            searched_services: None,
        }
    }

    #[tokio::test]
    async fn creation_survives_contract_service_outage() {
        let (service, gateway, _file) = setup().await;
        let orchestrator = Uuid::new_v4();

        gateway.set_available(false);
        let outcome = service.create(orchestrator, sample_request()).await.unwrap();
        assert!(outcome.contract_error.is_some());
        assert!(outcome.ecosystem.contract_id.is_none());

        // The ecosystem persisted and the contract can be generated later.
        gateway.set_available(true);
        let ecosystem = service
            .create_contract(outcome.ecosystem.id, orchestrator)
            .await
            .unwrap();
        assert!(ecosystem.contract_id.is_some());

        let err = service
            .create_contract(ecosystem.id, orchestrator)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Conflict(_)));
    }

    #[tokio::test]
    async fn participant_signature_requires_authorized_entry() {
        let (service, _gateway, _file) = setup().await;
        let orchestrator = Uuid::new_v4();
        let participant = Uuid::new_v4();

        let outcome = service.create(orchestrator, sample_request()).await.unwrap();
        let id = outcome.ecosystem.id;

        let err = service.sign_participant(id, participant, "sig").await.unwrap_err();
        assert!(matches!(err, ExchangeError::UnauthorizedParticipant));

        service
            .invite(id, orchestrator, participant, vec!["Data Provider".to_string()])
            .await
            .unwrap();
        let err = service.sign_participant(id, participant, "sig").await.unwrap_err();
        assert!(matches!(err, ExchangeError::UnauthorizedParticipant));

        service.accept_invitation(id, participant).await.unwrap();
        let ecosystem = service.sign_participant(id, participant, "sig").await.unwrap();
        assert!(ecosystem.is_participant(participant));
    }

    #[tokio::test]
    async fn join_request_round_trip_carries_offerings_into_membership() {
        let (service, _gateway, _file) = setup().await;
        let orchestrator = Uuid::new_v4();
        let participant = Uuid::new_v4();

        let outcome = service.create(orchestrator, sample_request()).await.unwrap();
        let id = outcome.ecosystem.id;

        let request = service
            .request_to_join(id, participant, vec!["Data Provider".to_string()])
            .await
            .unwrap();
        service
            .authorize_join_request(id, orchestrator, request.id)
            .await
            .unwrap();

        let offerings = vec![OfferingConfiguration {
            service_offering: Uuid::new_v4(),
            policy: vec![],
        }];
        service
            .configure_offerings(id, participant, offerings.clone())
            .await
            .unwrap();

        let ecosystem = service.sign_participant(id, participant, "sig").await.unwrap();
        let member = ecosystem
            .participants
            .iter()
            .find(|m| m.participant == participant)
            .unwrap();
        assert_eq!(member.offerings, offerings);
        assert_eq!(member.roles, vec!["Data Provider".to_string()]);
    }

    #[tokio::test]
    async fn only_the_orchestrator_can_delete() {
        let (service, _gateway, _file) = setup().await;
        let orchestrator = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let outcome = service.create(orchestrator, sample_request()).await.unwrap();
        let id = outcome.ecosystem.id;

        let err = service.delete(id, stranger).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Ownership(_)));

        service.delete(id, orchestrator).await.unwrap();
        let err = service.get(id).await.unwrap_err();
        assert!(matches!(err, ExchangeError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_persists_fields_even_when_injection_fails() {
        let (service, gateway, _file) = setup().await;
        let orchestrator = Uuid::new_v4();

        let outcome = service.create(orchestrator, sample_request()).await.unwrap();
        let id = outcome.ecosystem.id;

        gateway.set_available(false);
        let request = UpdateEcosystemRequest {
            patch: EcosystemPatch {
                name: Some("renamed dataspace".to_string()),
                ..EcosystemPatch::default()
            },
            role_assignments: None,
            roles_and_obligations: Some(vec![RoleObligation {
                role: "Data Provider".to_string(),
                policies: vec![],
            }]),
        };

        let outcome = service.update(id, orchestrator, request).await.unwrap();
        assert!(outcome.contract_error.is_some());
        assert_eq!(outcome.ecosystem.name, "renamed dataspace");

        let stored = service.get(id).await.unwrap();
        assert_eq!(stored.name, "renamed dataspace");
    }
}
