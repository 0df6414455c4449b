use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::context::StepContext;
use crate::error::Result;
use crate::models::Operation;
use crate::scheduler::RetryClass;

/// Every step a pipeline can contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    // certificate issuance
    RegisterAcmeUser,
    GeneratePrivateKey,
    InitiateChallenges,
    CreateTxtRecords,
    WaitForDnsChanges,
    AnswerChallenges,
    RetrieveCertificate,
    UploadCertificate,
    DeleteOldCertificates,
    DeleteAllCertificates,
    // dns
    CreateAliasRecords,
    RemoveAliasRecords,
    RemoveTxtRecords,
    // cdn
    CreateDistribution,
    WaitForDistribution,
    UpdateDistribution,
    UpdateDistributionCertificate,
    DisableDistribution,
    WaitForDistributionDisabled,
    DeleteDistribution,
    AdoptDistribution,
    // load balancer
    SelectAlb,
    SelectDedicatedAlb,
    EnsureAlbWebAcl,
    AddCertificateToAlb,
    WaitForCertificatePropagation,
    RemoveOldCertificateFromAlb,
    RemoveCertificateFromAlb,
    // dedicated waf
    CreateWebAcl,
    WaitForWebAcl,
    DeleteWebAcl,
    CreateHealthChecks,
    DeleteHealthChecks,
    AssociateShield,
    DisassociateShield,
    CreateSnsTopic,
    SubscribeSnsTopic,
    DeleteSnsTopic,
    CreateHealthCheckAlarms,
    CreateDdosAlarm,
    DeleteAlarms,
    // terminal
    SwitchInstanceKind,
    MarkDeprovisioned,
    MarkSucceeded,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterAcmeUser => "register_acme_user",
            Self::GeneratePrivateKey => "generate_private_key",
            Self::InitiateChallenges => "initiate_challenges",
            Self::CreateTxtRecords => "create_txt_records",
            Self::WaitForDnsChanges => "wait_for_dns_changes",
            Self::AnswerChallenges => "answer_challenges",
            Self::RetrieveCertificate => "retrieve_certificate",
            Self::UploadCertificate => "upload_certificate",
            Self::DeleteOldCertificates => "delete_old_certificates",
            Self::DeleteAllCertificates => "delete_all_certificates",
            Self::CreateAliasRecords => "create_alias_records",
            Self::RemoveAliasRecords => "remove_alias_records",
            Self::RemoveTxtRecords => "remove_txt_records",
            Self::CreateDistribution => "create_distribution",
            Self::WaitForDistribution => "wait_for_distribution",
            Self::UpdateDistribution => "update_distribution",
            Self::UpdateDistributionCertificate => "update_distribution_certificate",
            Self::DisableDistribution => "disable_distribution",
            Self::WaitForDistributionDisabled => "wait_for_distribution_disabled",
            Self::DeleteDistribution => "delete_distribution",
            Self::AdoptDistribution => "adopt_distribution",
            Self::SelectAlb => "select_alb",
            Self::SelectDedicatedAlb => "select_dedicated_alb",
            Self::EnsureAlbWebAcl => "ensure_alb_web_acl",
            Self::AddCertificateToAlb => "add_certificate_to_alb",
            Self::WaitForCertificatePropagation => "wait_for_certificate_propagation",
            Self::RemoveOldCertificateFromAlb => "remove_old_certificate_from_alb",
            Self::RemoveCertificateFromAlb => "remove_certificate_from_alb",
            Self::CreateWebAcl => "create_web_acl",
            Self::WaitForWebAcl => "wait_for_web_acl",
            Self::DeleteWebAcl => "delete_web_acl",
            Self::CreateHealthChecks => "create_health_checks",
            Self::DeleteHealthChecks => "delete_health_checks",
            Self::AssociateShield => "associate_shield",
            Self::DisassociateShield => "disassociate_shield",
            Self::CreateSnsTopic => "create_sns_topic",
            Self::SubscribeSnsTopic => "subscribe_sns_topic",
            Self::DeleteSnsTopic => "delete_sns_topic",
            Self::CreateHealthCheckAlarms => "create_health_check_alarms",
            Self::CreateDdosAlarm => "create_ddos_alarm",
            Self::DeleteAlarms => "delete_alarms",
            Self::SwitchInstanceKind => "switch_instance_kind",
            Self::MarkDeprovisioned => "mark_deprovisioned",
            Self::MarkSucceeded => "mark_succeeded",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of pipeline work
///
/// A step loads what it needs through the [`StepContext`], performs one
/// category of side effect, persists the result and returns. Executing a
/// step whose effect is already recorded must return early without calling
/// the external system again.
#[async_trait]
pub trait Step: Send + Sync {
    fn id(&self) -> StepId;

    /// Progress text recorded on the operation before the step runs
    fn description(&self) -> &'static str;

    fn retry_class(&self) -> RetryClass {
        RetryClass::Standard
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()>;
}
