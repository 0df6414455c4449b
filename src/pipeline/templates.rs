//! Pipeline templates per action and instance kind

use super::builder::{Pipeline, PipelineBuilder};
use super::step::StepId::{self, *};
use crate::config::{ConfigResult, ConfigurationError};
use crate::models::{InstanceKind, OperationAction};

/// Obtain and upload a certificate for the instance's domains
const ISSUE_CERTIFICATE: [StepId; 8] = [
    RegisterAcmeUser,
    GeneratePrivateKey,
    InitiateChallenges,
    CreateTxtRecords,
    WaitForDnsChanges,
    AnswerChallenges,
    RetrieveCertificate,
    UploadCertificate,
];

const ALIAS_RECORDS: [StepId; 2] = [CreateAliasRecords, WaitForDnsChanges];

const DEDICATED_WAF_MONITORING: [StepId; 6] = [
    CreateHealthChecks,
    AssociateShield,
    CreateSnsTopic,
    SubscribeSnsTopic,
    CreateHealthCheckAlarms,
    CreateDdosAlarm,
];

const DEDICATED_WAF_TEARDOWN: [StepId; 4] = [
    DeleteAlarms,
    DeleteSnsTopic,
    DisassociateShield,
    DeleteHealthChecks,
];

const CDN_TEARDOWN: [StepId; 3] = [DisableDistribution, WaitForDistributionDisabled, DeleteDistribution];

/// Build the pipeline for an operation
///
/// `migration_target` is required for [`OperationAction::PlanMigration`].
pub fn pipeline_for(
    action: OperationAction,
    kind: InstanceKind,
    migration_target: Option<InstanceKind>,
) -> ConfigResult<Pipeline> {
    let pipeline = match action {
        OperationAction::Provision => provision(kind)?,
        OperationAction::Deprovision => deprovision(kind),
        OperationAction::Update => rotate(OperationAction::Update, kind)?,
        OperationAction::Renew => rotate(OperationAction::Renew, kind)?,
        OperationAction::PlanMigration => {
            let target = migration_target.ok_or_else(|| {
                ConfigurationError::missing_required_field("migration_target", "plan migration")
            })?;
            plan_migration(kind, target)?
        }
    };
    Ok(pipeline)
}

fn unsupported(action: OperationAction, kind: InstanceKind) -> ConfigurationError {
    ConfigurationError::unsupported_pipeline(action.as_str(), kind.as_str())
}

fn provision(kind: InstanceKind) -> ConfigResult<Pipeline> {
    let builder = PipelineBuilder::new(OperationAction::Provision, kind);
    let pipeline = match kind {
        InstanceKind::Cdn | InstanceKind::CdnDedicatedWaf => {
            let dedicated = kind == InstanceKind::CdnDedicatedWaf;
            builder
                .steps(ISSUE_CERTIFICATE)
                .steps_if(dedicated, [CreateWebAcl, WaitForWebAcl])
                .steps([CreateDistribution, WaitForDistribution])
                .steps(ALIAS_RECORDS)
                .steps_if(dedicated, DEDICATED_WAF_MONITORING)
                .step(MarkSucceeded)
                .build()
        }
        InstanceKind::Alb | InstanceKind::DedicatedAlb => {
            let dedicated = kind == InstanceKind::DedicatedAlb;
            builder
                .steps(ISSUE_CERTIFICATE)
                .steps_if(!dedicated, [SelectAlb])
                .steps_if(dedicated, [SelectDedicatedAlb, EnsureAlbWebAcl])
                .step(AddCertificateToAlb)
                .steps(ALIAS_RECORDS)
                .step(MarkSucceeded)
                .build()
        }
        InstanceKind::Migration => return Err(unsupported(OperationAction::Provision, kind)),
    };
    Ok(pipeline)
}

fn deprovision(kind: InstanceKind) -> Pipeline {
    let builder = PipelineBuilder::new(OperationAction::Deprovision, kind)
        .steps([RemoveAliasRecords, RemoveTxtRecords]);

    let builder = match kind {
        InstanceKind::Cdn | InstanceKind::Migration => builder.steps(CDN_TEARDOWN),
        InstanceKind::CdnDedicatedWaf => builder
            .steps(DEDICATED_WAF_TEARDOWN)
            .steps(CDN_TEARDOWN)
            .step(DeleteWebAcl),
        InstanceKind::Alb | InstanceKind::DedicatedAlb => builder.step(RemoveCertificateFromAlb),
    };

    builder
        .steps([DeleteAllCertificates, MarkDeprovisioned])
        .build()
}

fn rotate(action: OperationAction, kind: InstanceKind) -> ConfigResult<Pipeline> {
    let builder = PipelineBuilder::new(action, kind).steps(ISSUE_CERTIFICATE);
    let renew = action == OperationAction::Renew;

    let pipeline = match kind {
        InstanceKind::Cdn | InstanceKind::CdnDedicatedWaf => builder
            .step(if renew {
                UpdateDistributionCertificate
            } else {
                UpdateDistribution
            })
            .step(WaitForDistribution)
            .steps_if(!renew, ALIAS_RECORDS)
            .steps([DeleteOldCertificates, MarkSucceeded])
            .build(),
        InstanceKind::Alb | InstanceKind::DedicatedAlb => builder
            .steps([
                AddCertificateToAlb,
                WaitForCertificatePropagation,
                RemoveOldCertificateFromAlb,
            ])
            .steps_if(!renew, ALIAS_RECORDS)
            .steps([DeleteOldCertificates, MarkSucceeded])
            .build(),
        InstanceKind::Migration => return Err(unsupported(action, kind)),
    };
    Ok(pipeline)
}

fn plan_migration(from: InstanceKind, to: InstanceKind) -> ConfigResult<Pipeline> {
    let builder = PipelineBuilder::new(OperationAction::PlanMigration, from);
    let pipeline = match (from, to) {
        (InstanceKind::Cdn, InstanceKind::CdnDedicatedWaf) => builder
            .steps([CreateWebAcl, WaitForWebAcl, UpdateDistribution, WaitForDistribution])
            .steps(DEDICATED_WAF_MONITORING)
            .steps([SwitchInstanceKind, MarkSucceeded])
            .build(),
        (InstanceKind::Alb, InstanceKind::DedicatedAlb) => builder
            .steps([SelectDedicatedAlb, EnsureAlbWebAcl, AddCertificateToAlb])
            .steps(ALIAS_RECORDS)
            .steps([
                WaitForCertificatePropagation,
                RemoveOldCertificateFromAlb,
                SwitchInstanceKind,
                MarkSucceeded,
            ])
            .build(),
        (InstanceKind::Migration, InstanceKind::Cdn) => builder
            .step(AdoptDistribution)
            .steps(ISSUE_CERTIFICATE)
            .steps([UpdateDistribution, WaitForDistribution])
            .steps(ALIAS_RECORDS)
            .steps([SwitchInstanceKind, MarkSucceeded])
            .build(),
        _ => {
            return Err(ConfigurationError::unsupported_pipeline(
                OperationAction::PlanMigration.as_str(),
                format!("{from} -> {to}"),
            ))
        }
    };
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdn_provision_shape() {
        let pipeline = pipeline_for(OperationAction::Provision, InstanceKind::Cdn, None).unwrap();
        assert_eq!(
            pipeline.steps,
            vec![
                RegisterAcmeUser,
                GeneratePrivateKey,
                InitiateChallenges,
                CreateTxtRecords,
                WaitForDnsChanges,
                AnswerChallenges,
                RetrieveCertificate,
                UploadCertificate,
                CreateDistribution,
                WaitForDistribution,
                CreateAliasRecords,
                WaitForDnsChanges,
                MarkSucceeded,
            ]
        );
    }

    #[test]
    fn test_alb_provision_selects_then_attaches() {
        let pipeline = pipeline_for(OperationAction::Provision, InstanceKind::Alb, None).unwrap();
        let select = pipeline.position(SelectAlb).unwrap();
        let attach = pipeline.position(AddCertificateToAlb).unwrap();
        assert!(pipeline.position(UploadCertificate).unwrap() < select);
        assert_eq!(attach, select + 1);
        assert!(!pipeline.contains(CreateDistribution));

        let dedicated =
            pipeline_for(OperationAction::Provision, InstanceKind::DedicatedAlb, None).unwrap();
        assert!(dedicated.contains(SelectDedicatedAlb));
        assert!(dedicated.contains(EnsureAlbWebAcl));
        assert!(!dedicated.contains(SelectAlb));
    }

    #[test]
    fn test_dedicated_waf_provision_adds_monitoring() {
        let pipeline =
            pipeline_for(OperationAction::Provision, InstanceKind::CdnDedicatedWaf, None).unwrap();
        assert!(pipeline.position(WaitForWebAcl).unwrap() < pipeline.position(CreateDistribution).unwrap());
        for step in DEDICATED_WAF_MONITORING {
            assert!(pipeline.contains(step));
        }
        assert_eq!(pipeline.steps.last(), Some(&MarkSucceeded));
    }

    #[test]
    fn test_deprovision_tears_down_in_reverse() {
        let pipeline =
            pipeline_for(OperationAction::Deprovision, InstanceKind::CdnDedicatedWaf, None).unwrap();
        assert_eq!(pipeline.steps[0], RemoveAliasRecords);
        assert!(pipeline.position(DeleteAlarms).unwrap() < pipeline.position(DeleteHealthChecks).unwrap());
        assert!(pipeline.position(DeleteDistribution).unwrap() < pipeline.position(DeleteWebAcl).unwrap());
        assert_eq!(pipeline.steps.last(), Some(&MarkDeprovisioned));

        let alb = pipeline_for(OperationAction::Deprovision, InstanceKind::Alb, None).unwrap();
        assert_eq!(
            alb.steps,
            vec![
                RemoveAliasRecords,
                RemoveTxtRecords,
                RemoveCertificateFromAlb,
                DeleteAllCertificates,
                MarkDeprovisioned,
            ]
        );
    }

    #[test]
    fn test_alb_rotation_waits_before_removing_old_certificate() {
        let pipeline = pipeline_for(OperationAction::Renew, InstanceKind::Alb, None).unwrap();
        let add = pipeline.position(AddCertificateToAlb).unwrap();
        assert_eq!(pipeline.steps[add + 1], WaitForCertificatePropagation);
        assert_eq!(pipeline.steps[add + 2], RemoveOldCertificateFromAlb);
        assert!(!pipeline.contains(CreateAliasRecords));
    }

    #[test]
    fn test_cdn_update_vs_renew() {
        let update = pipeline_for(OperationAction::Update, InstanceKind::Cdn, None).unwrap();
        assert!(update.contains(UpdateDistribution));
        assert!(update.contains(CreateAliasRecords));

        let renew = pipeline_for(OperationAction::Renew, InstanceKind::Cdn, None).unwrap();
        assert!(renew.contains(UpdateDistributionCertificate));
        assert!(!renew.contains(UpdateDistribution));
        assert_eq!(renew.steps[renew.len() - 2], DeleteOldCertificates);
    }

    #[test]
    fn test_plan_migrations() {
        let adopt = pipeline_for(
            OperationAction::PlanMigration,
            InstanceKind::Migration,
            Some(InstanceKind::Cdn),
        )
        .unwrap();
        assert_eq!(adopt.steps[0], AdoptDistribution);
        assert_eq!(adopt.steps[adopt.len() - 2], SwitchInstanceKind);

        assert!(pipeline_for(
            OperationAction::PlanMigration,
            InstanceKind::Cdn,
            Some(InstanceKind::CdnDedicatedWaf)
        )
        .is_ok());
        assert!(pipeline_for(
            OperationAction::PlanMigration,
            InstanceKind::Alb,
            Some(InstanceKind::DedicatedAlb)
        )
        .is_ok());
        assert!(pipeline_for(
            OperationAction::PlanMigration,
            InstanceKind::Cdn,
            Some(InstanceKind::Alb)
        )
        .is_err());
        assert!(pipeline_for(OperationAction::PlanMigration, InstanceKind::Cdn, None).is_err());
    }

    #[test]
    fn test_migration_placeholder_cannot_provision() {
        assert!(matches!(
            pipeline_for(OperationAction::Provision, InstanceKind::Migration, None),
            Err(ConfigurationError::UnsupportedPipeline { .. })
        ));
    }
}
