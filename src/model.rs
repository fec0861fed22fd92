use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ExchangeError, Result};
use crate::{ContractId, EcosystemId, NegotiationId, OfferingId, ParticipantId};

/// Policy rule attached to an exchange. Semantics are opaque to the engine;
/// rules are carried for display and contract injection only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub rule_id: String,
    #[serde(default)]
    pub values: Value,
}

/// Role-scoped obligations injected into an ecosystem contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleObligation {
    pub role: String,
    #[serde(default)]
    pub policies: Vec<Value>,
}

/// An offering a participant makes available, with the policies configured
/// for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferingConfiguration {
    pub service_offering: OfferingId,
    #[serde(default)]
    pub policy: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationStatus {
    Requested,
    Authorized,
    SignatureReady,
    Negotiation,
    Signed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signatures {
    pub provider: Option<String>,
    pub consumer: Option<String>,
}

/// Bilateral agreement between a provider and a consumer over a pair of
/// service offerings. All transitions are pure; contract gateway calls and
/// persistence are sequenced by the negotiation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeConfiguration {
    pub id: NegotiationId,
    pub provider: ParticipantId,
    pub consumer: ParticipantId,
    pub provider_service_offering: OfferingId,
    pub consumer_service_offering: OfferingId,
    pub negotiation_status: NegotiationStatus,
    pub provider_policies: Vec<PolicyRule>,
    pub latest_negotiator: Option<ParticipantId>,
    pub signatures: Signatures,
    pub contract_id: Option<ContractId>,
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeConfiguration {
    pub fn new(
        provider: ParticipantId,
        consumer: ParticipantId,
        provider_service_offering: OfferingId,
        consumer_service_offering: OfferingId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            consumer,
            provider_service_offering,
            consumer_service_offering,
            negotiation_status: NegotiationStatus::Requested,
            provider_policies: vec![],
            latest_negotiator: None,
            signatures: Signatures::default(),
            contract_id: None,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_party(&self, participant: ParticipantId) -> bool {
        self.provider == participant || self.consumer == participant
    }

    /// Provider authorizes the request, seeding the initial policy set.
    /// The service only commits this transition once the backing contract
    /// has been generated.
    pub fn authorize(&mut self, caller: ParticipantId, policies: Vec<PolicyRule>) -> Result<()> {
        if caller != self.provider {
            return Err(ExchangeError::Ownership(
                "exchange configuration could not be authorized: caller is not the provider"
                    .to_string(),
            ));
        }
        if self.negotiation_status != NegotiationStatus::Requested {
            return Err(ExchangeError::InvalidOperation(
                "exchange configuration has already been authorized".to_string(),
            ));
        }

        self.provider_policies = policies;
        self.latest_negotiator = Some(self.provider);
        self.negotiation_status = NegotiationStatus::Authorized;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Consumer accepts the authorized policies as-is.
    pub fn accept(&mut self, caller: ParticipantId) -> Result<()> {
        if caller != self.consumer {
            return Err(ExchangeError::Ownership(
                "only the consumer can accept an exchange configuration".to_string(),
            ));
        }
        match self.negotiation_status {
            NegotiationStatus::Authorized => {
                self.negotiation_status = NegotiationStatus::SignatureReady;
                self.updated_at = Utc::now();
                Ok(())
            }
            NegotiationStatus::Requested => Err(ExchangeError::InvalidOperation(
                "exchange configuration has not been authorized yet".to_string(),
            )),
            _ => Err(ExchangeError::InvalidOperation(
                "exchange configuration has already been validated and is pending signatures"
                    .to_string(),
            )),
        }
    }

    /// Either party proposes a replacement policy set. Proposals must
    /// strictly alternate between the two parties.
    pub fn negotiate(&mut self, caller: ParticipantId, policies: Vec<PolicyRule>) -> Result<()> {
        if !self.is_party(caller) {
            return Err(ExchangeError::Ownership(
                "only the provider or consumer can negotiate policies".to_string(),
            ));
        }
        match self.negotiation_status {
            NegotiationStatus::Authorized
            | NegotiationStatus::SignatureReady
            | NegotiationStatus::Negotiation => {}
            NegotiationStatus::Requested => {
                return Err(ExchangeError::InvalidOperation(
                    "exchange configuration has not been authorized yet".to_string(),
                ))
            }
            NegotiationStatus::Signed => {
                return Err(ExchangeError::InvalidOperation(
                    "exchange configuration has already been signed".to_string(),
                ))
            }
        }
        if self.latest_negotiator == Some(caller) {
            return Err(ExchangeError::InvalidOperation(
                "the same party cannot submit two consecutive policy proposals".to_string(),
            ));
        }

        self.provider_policies = policies;
        self.latest_negotiator = Some(caller);
        self.negotiation_status = NegotiationStatus::Negotiation;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Records the caller's signature. Returns true when both parties have
    /// now signed, in which case the status is finalized to `Signed`.
    pub fn record_signature(&mut self, caller: ParticipantId, signature: &str) -> Result<bool> {
        if !self.is_party(caller) {
            return Err(ExchangeError::Ownership(
                "only the provider or consumer can sign an exchange configuration".to_string(),
            ));
        }
        match self.negotiation_status {
            NegotiationStatus::SignatureReady | NegotiationStatus::Negotiation => {}
            _ => {
                return Err(ExchangeError::InvalidOperation(
                    "exchange configuration is not ready for signature".to_string(),
                ))
            }
        }

        let slot = if caller == self.provider {
            &mut self.signatures.provider
        } else {
            &mut self.signatures.consumer
        };
        if slot.is_some() {
            return Err(ExchangeError::InvalidOperation(
                "this party has already signed the exchange configuration".to_string(),
            ));
        }
        *slot = Some(signature.to_string());
        self.updated_at = Utc::now();

        if self.both_signed() {
            self.negotiation_status = NegotiationStatus::Signed;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn both_signed(&self) -> bool {
        self.signatures.provider.is_some() && self.signatures.consumer.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipStatus {
    Pending,
    Authorized,
    Rejected,
    Signed,
}

/// One participant's entry in an ecosystem's invitation, join-request or
/// participants list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipEntry {
    pub id: Uuid,
    pub participant: ParticipantId,
    pub roles: Vec<String>,
    #[serde(default)]
    pub offerings: Vec<OfferingConfiguration>,
    pub status: MembershipStatus,
    pub created_at: DateTime<Utc>,
}

impl MembershipEntry {
    fn pending(participant: ParticipantId, roles: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant,
            roles,
            offerings: vec![],
            status: MembershipStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Role/roles reassignment for one participant, applied across invitations
/// and join requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRoles {
    pub participant_id: ParticipantId,
    pub roles: Vec<String>,
}

/// Where a participant currently stands relative to an ecosystem. Rejected
/// entries do not count; a participant holds at most one live position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipResolution {
    None,
    AlreadyParticipant,
    PendingInvitation(Uuid),
    PendingJoinRequest(Uuid),
}

/// Partial metadata update for an ecosystem. Absent fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcosystemPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub logo: Option<String>,
    pub country_or_region: Option<String>,
    pub target_audience: Option<String>,
    pub use_cases: Option<Vec<String>>,
    pub searched_data: Option<Vec<String>>,
    pub searched_services: Option<Vec<String>>,
}

/// Multi-party collaboration space. The ecosystem is the aggregate root for
/// its participants, invitations and join requests; those lists are only
/// mutated through methods here and persisted as one atomic write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ecosystem {
    pub id: EcosystemId,
    pub name: String,
    pub description: String,
    pub orchestrator: ParticipantId,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub country_or_region: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub use_cases: Vec<String>,
    #[serde(default)]
    pub searched_data: Vec<String>,
    #[serde(default)]
    pub searched_services: Vec<String>,
    pub contract_id: Option<ContractId>,
    pub participants: Vec<MembershipEntry>,
    pub invitations: Vec<MembershipEntry>,
    pub join_requests: Vec<MembershipEntry>,
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ecosystem {
    pub fn new(orchestrator: ParticipantId, name: String, description: String) -> Self {
        let orchestrator_entry = MembershipEntry {
            id: Uuid::new_v4(),
            participant: orchestrator,
            roles: vec!["Orchestrator".to_string()],
            offerings: vec![],
            status: MembershipStatus::Signed,
            created_at: Utc::now(),
        };

        Self {
            id: Uuid::new_v4(),
            name,
            description,
            orchestrator,
            logo: None,
            country_or_region: None,
            target_audience: None,
            use_cases: vec![],
            searched_data: vec![],
            searched_services: vec![],
            contract_id: None,
            participants: vec![orchestrator_entry],
            invitations: vec![],
            join_requests: vec![],
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_participant(&self, participant: ParticipantId) -> bool {
        self.participants.iter().any(|p| p.participant == participant)
    }

    /// Single race-resolution point shared by `invite` and
    /// `request_to_join`: a participant can hold at most one live position.
    pub fn resolve_membership(&self, participant: ParticipantId) -> MembershipResolution {
        if self.is_participant(participant) {
            return MembershipResolution::AlreadyParticipant;
        }
        if let Some(inv) = self
            .invitations
            .iter()
            .find(|e| e.participant == participant && e.status == MembershipStatus::Pending)
        {
            return MembershipResolution::PendingInvitation(inv.id);
        }
        if let Some(jr) = self
            .join_requests
            .iter()
            .find(|e| e.participant == participant && e.status == MembershipStatus::Pending)
        {
            return MembershipResolution::PendingJoinRequest(jr.id);
        }
        MembershipResolution::None
    }

    /// Orchestrator invites a participant. If that participant already has
    /// a pending join request, the request is authorized on the inviter's
    /// terms instead of opening a second live entry.
    pub fn invite(
        &mut self,
        participant: ParticipantId,
        roles: Vec<String>,
    ) -> Result<MembershipEntry> {
        match self.resolve_membership(participant) {
            MembershipResolution::AlreadyParticipant => {
                Err(ExchangeError::ExistingParticipant(participant))
            }
            MembershipResolution::PendingInvitation(_) => Err(ExchangeError::InvalidOperation(
                "an invitation for this participant is already pending".to_string(),
            )),
            MembershipResolution::PendingJoinRequest(request_id) => {
                self.authorize_join_request(request_id, Some(roles))
            }
            MembershipResolution::None => {
                let entry = MembershipEntry::pending(participant, roles);
                self.invitations.push(entry.clone());
                self.touch();
                Ok(entry)
            }
        }
    }

    /// Invited participant accepts. The invitation becomes `Authorized`;
    /// membership itself is only granted by the later signature step.
    pub fn accept_invitation(&mut self, participant: ParticipantId) -> Result<MembershipEntry> {
        let entry = self
            .invitations
            .iter_mut()
            .find(|e| e.participant == participant && e.status == MembershipStatus::Pending)
            .ok_or_else(|| {
                ExchangeError::InvalidOperation(
                    "no pending invitation for this participant".to_string(),
                )
            })?;

        entry.status = MembershipStatus::Authorized;
        let entry = entry.clone();
        self.touch();
        Ok(entry)
    }

    pub fn deny_invitation(&mut self, participant: ParticipantId) -> Result<MembershipEntry> {
        let entry = self
            .invitations
            .iter_mut()
            .find(|e| e.participant == participant && e.status == MembershipStatus::Pending)
            .ok_or_else(|| {
                ExchangeError::InvalidOperation(
                    "no pending invitation for this participant".to_string(),
                )
            })?;

        entry.status = MembershipStatus::Rejected;
        let entry = entry.clone();
        self.touch();
        Ok(entry)
    }

    /// Participant asks to join. A pending invitation is authorized instead
    /// (the symmetric race resolution to `invite`).
    pub fn request_to_join(
        &mut self,
        participant: ParticipantId,
        roles: Vec<String>,
    ) -> Result<MembershipEntry> {
        match self.resolve_membership(participant) {
            MembershipResolution::AlreadyParticipant => {
                Err(ExchangeError::ExistingParticipant(participant))
            }
            MembershipResolution::PendingInvitation(_) => self.accept_invitation(participant),
            MembershipResolution::PendingJoinRequest(_) => Err(ExchangeError::InvalidOperation(
                "a join request for this participant is already pending".to_string(),
            )),
            MembershipResolution::None => {
                let entry = MembershipEntry::pending(participant, roles);
                self.join_requests.push(entry.clone());
                self.touch();
                Ok(entry)
            }
        }
    }

    /// Orchestrator authorizes a join request, optionally overriding the
    /// requested roles. An unknown request id is a client mistake, not a
    /// missing resource: the ecosystem itself exists.
    pub fn authorize_join_request(
        &mut self,
        request_id: Uuid,
        override_roles: Option<Vec<String>>,
    ) -> Result<MembershipEntry> {
        let entry = self
            .join_requests
            .iter_mut()
            .find(|e| e.id == request_id)
            .ok_or_else(|| {
                ExchangeError::InvalidOperation(
                    "join request not found in this ecosystem".to_string(),
                )
            })?;
        if entry.status != MembershipStatus::Pending {
            return Err(ExchangeError::InvalidOperation(
                "join request is no longer pending".to_string(),
            ));
        }

        if let Some(roles) = override_roles {
            entry.roles = roles;
        }
        entry.status = MembershipStatus::Authorized;
        let entry = entry.clone();
        self.touch();
        Ok(entry)
    }

    pub fn reject_join_request(&mut self, request_id: Uuid) -> Result<MembershipEntry> {
        let entry = self
            .join_requests
            .iter_mut()
            .find(|e| e.id == request_id)
            .ok_or_else(|| {
                ExchangeError::InvalidOperation(
                    "join request not found in this ecosystem".to_string(),
                )
            })?;

        entry.status = MembershipStatus::Rejected;
        let entry = entry.clone();
        self.touch();
        Ok(entry)
    }

    /// Field update, not a transition: a participant with any live entry
    /// may reconfigure their offerings at any pre-terminal status.
    pub fn configure_offerings(
        &mut self,
        participant: ParticipantId,
        offerings: Vec<OfferingConfiguration>,
    ) -> Result<()> {
        let mut touched = false;
        for entry in self
            .participants
            .iter_mut()
            .chain(self.invitations.iter_mut())
            .chain(self.join_requests.iter_mut())
        {
            if entry.participant == participant && entry.status != MembershipStatus::Rejected {
                entry.offerings = offerings.clone();
                touched = true;
            }
        }
        if !touched {
            return Err(ExchangeError::InvalidOperation(
                "the participant has no live invitation, join request or membership in this ecosystem"
                    .to_string(),
            ));
        }
        self.touch();
        Ok(())
    }

    /// Bulk role reassignment across invitations and join requests.
    /// Entries for participants not listed are left untouched.
    pub fn assign_roles(&mut self, assignments: &[ParticipantRoles]) {
        let mut touched = false;
        for assignment in assignments {
            for entry in self
                .invitations
                .iter_mut()
                .chain(self.join_requests.iter_mut())
            {
                if entry.participant == assignment.participant_id {
                    entry.roles = assignment.roles.clone();
                    touched = true;
                }
            }
        }
        if touched {
            self.touch();
        }
    }

    /// True when the participant holds an `Authorized` invitation or join
    /// request. An already-signed entry does not satisfy this check.
    pub fn has_authorized_entry(&self, participant: ParticipantId) -> bool {
        self.invitations
            .iter()
            .chain(self.join_requests.iter())
            .any(|e| e.participant == participant && e.status == MembershipStatus::Authorized)
    }

    /// Converts the participant's authorized entry into membership after a
    /// successful contract signature: the entry becomes `Signed` and the
    /// participant joins `participants` with the entry's roles/offerings.
    pub fn promote_signer(&mut self, participant: ParticipantId) -> Result<MembershipEntry> {
        let entry = self
            .invitations
            .iter_mut()
            .chain(self.join_requests.iter_mut())
            .find(|e| e.participant == participant && e.status == MembershipStatus::Authorized)
            .ok_or(ExchangeError::UnauthorizedParticipant)?;

        entry.status = MembershipStatus::Signed;
        let member = MembershipEntry {
            id: Uuid::new_v4(),
            participant,
            roles: entry.roles.clone(),
            offerings: entry.offerings.clone(),
            status: MembershipStatus::Signed,
            created_at: Utc::now(),
        };
        self.participants.push(member.clone());
        self.touch();
        Ok(member)
    }

    pub fn apply_patch(&mut self, patch: EcosystemPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(logo) = patch.logo {
            self.logo = Some(logo);
        }
        if let Some(region) = patch.country_or_region {
            self.country_or_region = Some(region);
        }
        if let Some(audience) = patch.target_audience {
            self.target_audience = Some(audience);
        }
        if let Some(use_cases) = patch.use_cases {
            self.use_cases = use_cases;
        }
        if let Some(searched_data) = patch.searched_data {
            self.searched_data = searched_data;
        }
        if let Some(searched_services) = patch.searched_services {
            self.searched_services = searched_services;
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(id: &str) -> PolicyRule {
        PolicyRule {
            rule_id: id.to_string(),
            values: json!({ "dateBegin": "2024-01-01", "dateEnd": "2026-01-01" }),
        }
    }

    fn sample_configuration() -> ExchangeConfiguration {
        ExchangeConfiguration::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn authorize_moves_requested_to_authorized() {
        let mut config = sample_configuration();
        config.authorize(config.provider, vec![rule("rule-access-5")]).unwrap();

        assert_eq!(config.negotiation_status, NegotiationStatus::Authorized);
        assert_eq!(config.latest_negotiator, Some(config.provider));
        assert_eq!(config.provider_policies[0].rule_id, "rule-access-5");
    }

    #[test]
    fn authorize_succeeds_at_most_once() {
        let mut config = sample_configuration();
        config.authorize(config.provider, vec![]).unwrap();

        let err = config.authorize(config.provider, vec![]).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOperation(_)));
    }

    #[test]
    fn only_the_provider_can_authorize() {
        let mut config = sample_configuration();
        let err = config.authorize(config.consumer, vec![]).unwrap_err();
        assert!(matches!(err, ExchangeError::Ownership(_)));
        assert_eq!(config.negotiation_status, NegotiationStatus::Requested);
    }

    #[test]
    fn accept_requires_authorized_status() {
        let mut config = sample_configuration();
        let err = config.accept(config.consumer).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOperation(_)));

        config.authorize(config.provider, vec![]).unwrap();
        config.accept(config.consumer).unwrap();
        assert_eq!(config.negotiation_status, NegotiationStatus::SignatureReady);

        let err = config.accept(config.consumer).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOperation(_)));
    }

    #[test]
    fn negotiate_alternates_between_parties() {
        let mut config = sample_configuration();
        config.authorize(config.provider, vec![rule("r1")]).unwrap();

        // Provider authorized last, so the provider cannot propose next.
        let err = config.negotiate(config.provider, vec![rule("r2")]).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOperation(_)));
        assert_eq!(config.provider_policies[0].rule_id, "r1");

        config.negotiate(config.consumer, vec![rule("r2")]).unwrap();
        assert_eq!(config.negotiation_status, NegotiationStatus::Negotiation);
        assert_eq!(config.latest_negotiator, Some(config.consumer));
        assert_eq!(config.provider_policies[0].rule_id, "r2");

        let err = config.negotiate(config.consumer, vec![rule("r3")]).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOperation(_)));
        assert_eq!(config.provider_policies[0].rule_id, "r2");

        config.negotiate(config.provider, vec![rule("r3")]).unwrap();
        assert_eq!(config.provider_policies[0].rule_id, "r3");
    }

    #[test]
    fn signing_finalizes_only_with_both_signatures() {
        let mut config = sample_configuration();
        config.authorize(config.provider, vec![]).unwrap();
        config.accept(config.consumer).unwrap();

        let both = config.record_signature(config.provider, "sig-p").unwrap();
        assert!(!both);
        assert_eq!(config.negotiation_status, NegotiationStatus::SignatureReady);

        let err = config.record_signature(config.provider, "sig-p2").unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOperation(_)));

        let both = config.record_signature(config.consumer, "sig-c").unwrap();
        assert!(both);
        assert_eq!(config.negotiation_status, NegotiationStatus::Signed);
    }

    #[test]
    fn signing_requires_signature_ready_or_negotiation_status() {
        let mut config = sample_configuration();
        let err = config.record_signature(config.provider, "sig").unwrap_err();
        match err {
            ExchangeError::InvalidOperation(message) => {
                assert!(message.contains("not ready for signature"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn sample_ecosystem() -> Ecosystem {
        Ecosystem::new(
            Uuid::new_v4(),
            "logistics dataspace".to_string(),
            "shared logistics data".to_string(),
        )
    }

    #[test]
    fn orchestrator_is_seeded_as_participant() {
        let eco = sample_ecosystem();
        assert!(eco.is_participant(eco.orchestrator));
        assert_eq!(eco.participants[0].roles, vec!["Orchestrator".to_string()]);
    }

    #[test]
    fn invite_then_accept_authorizes_the_invitation() {
        let mut eco = sample_ecosystem();
        let participant = Uuid::new_v4();

        eco.invite(participant, vec!["Data Provider".to_string()]).unwrap();
        assert_eq!(eco.invitations[0].status, MembershipStatus::Pending);

        eco.accept_invitation(participant).unwrap();
        assert_eq!(eco.invitations[0].status, MembershipStatus::Authorized);
        // Acceptance alone grants no membership.
        assert!(!eco.is_participant(participant));
    }

    #[test]
    fn deny_rejects_the_invitation() {
        let mut eco = sample_ecosystem();
        let participant = Uuid::new_v4();
        eco.invite(participant, vec![]).unwrap();

        eco.deny_invitation(participant).unwrap();
        assert_eq!(eco.invitations[0].status, MembershipStatus::Rejected);

        // A rejected entry no longer blocks a fresh join request.
        eco.request_to_join(participant, vec![]).unwrap();
        assert_eq!(eco.join_requests[0].status, MembershipStatus::Pending);
    }

    #[test]
    fn existing_participant_cannot_request_to_join() {
        let mut eco = sample_ecosystem();
        let err = eco.request_to_join(eco.orchestrator, vec![]).unwrap_err();
        assert!(matches!(err, ExchangeError::ExistingParticipant(_)));
    }

    #[test]
    fn invite_resolves_a_pending_join_request_on_inviter_terms() {
        let mut eco = sample_ecosystem();
        let participant = Uuid::new_v4();
        eco.request_to_join(participant, vec!["Data Provider".to_string()]).unwrap();

        let entry = eco.invite(participant, vec!["Service Provider".to_string()]).unwrap();
        assert_eq!(entry.status, MembershipStatus::Authorized);
        assert_eq!(entry.roles, vec!["Service Provider".to_string()]);
        assert!(eco.invitations.is_empty());
    }

    #[test]
    fn request_to_join_resolves_a_pending_invitation() {
        let mut eco = sample_ecosystem();
        let participant = Uuid::new_v4();
        eco.invite(participant, vec!["Data Provider".to_string()]).unwrap();

        let entry = eco.request_to_join(participant, vec![]).unwrap();
        assert_eq!(entry.status, MembershipStatus::Authorized);
        assert!(eco.join_requests.is_empty());
    }

    #[test]
    fn unknown_join_request_id_is_a_client_error() {
        let mut eco = sample_ecosystem();
        let err = eco.authorize_join_request(Uuid::new_v4(), None).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOperation(_)));
    }

    #[test]
    fn promote_signer_requires_an_authorized_entry() {
        let mut eco = sample_ecosystem();
        let participant = Uuid::new_v4();

        let err = eco.promote_signer(participant).unwrap_err();
        assert!(matches!(err, ExchangeError::UnauthorizedParticipant));

        eco.invite(participant, vec!["Data Provider".to_string()]).unwrap();
        let err = eco.promote_signer(participant).unwrap_err();
        assert!(matches!(err, ExchangeError::UnauthorizedParticipant));

        eco.accept_invitation(participant).unwrap();
        let member = eco.promote_signer(participant).unwrap();
        assert!(eco.is_participant(participant));
        assert_eq!(member.roles, vec!["Data Provider".to_string()]);
        assert_eq!(eco.invitations[0].status, MembershipStatus::Signed);

        // A signed entry does not re-satisfy the authorization check.
        let err = eco.promote_signer(participant).unwrap_err();
        assert!(matches!(err, ExchangeError::UnauthorizedParticipant));
    }

    #[test]
    fn offerings_follow_the_live_entry() {
        let mut eco = sample_ecosystem();
        let participant = Uuid::new_v4();
        eco.invite(participant, vec!["Data Provider".to_string()]).unwrap();
        eco.accept_invitation(participant).unwrap();

        let offerings = vec![OfferingConfiguration {
            service_offering: Uuid::new_v4(),
            policy: vec![rule("rule-access-1")],
        }];
        eco.configure_offerings(participant, offerings.clone()).unwrap();

        let member = eco.promote_signer(participant).unwrap();
        assert_eq!(member.offerings, offerings);

        let stranger = Uuid::new_v4();
        let err = eco.configure_offerings(stranger, vec![]).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOperation(_)));
    }

    #[test]
    fn assign_roles_only_touches_matching_entries() {
        let mut eco = sample_ecosystem();
        let invited = Uuid::new_v4();
        let requester = Uuid::new_v4();
        eco.invite(invited, vec!["Data Provider".to_string()]).unwrap();
        eco.request_to_join(requester, vec!["Data Provider".to_string()]).unwrap();

        eco.assign_roles(&[ParticipantRoles {
            participant_id: invited,
            roles: vec!["Service Provider".to_string()],
        }]);

        assert_eq!(eco.invitations[0].roles, vec!["Service Provider".to_string()]);
        assert_eq!(eco.join_requests[0].roles, vec!["Data Provider".to_string()]);
    }
}
