use super::errors::{StateMachineError, StateMachineResult};
use super::states::RotationState;
use crate::models::{Certificate, ServiceInstance};

/// Certificate rotation rules for a service instance
///
/// ```text
/// unissued ──begin──▶ rotating ──attach──▶ stable ──begin──▶ rotating ...
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateRotation;

impl CertificateRotation {
    pub fn state(instance: &ServiceInstance) -> RotationState {
        RotationState::from_linkage(instance.current_certificate_id, instance.new_certificate_id)
    }

    /// Start rotating in a freshly created certificate
    ///
    /// Re-beginning with the certificate already in rotation is a no-op.
    pub fn begin(instance: &mut ServiceInstance, certificate_id: i64) -> StateMachineResult<()> {
        if instance.current_certificate_id == Some(certificate_id) {
            return Err(StateMachineError::InvalidTransition {
                from: format!("{:?}", Self::state(instance)),
                event: "begin with the current certificate".to_string(),
            });
        }
        instance.new_certificate_id = Some(certificate_id);
        Ok(())
    }

    /// Swap the new certificate in as current; returns the one it replaced
    ///
    /// Attaching when nothing is rotating is a no-op so a re-delivered
    /// attachment step leaves the linkage untouched.
    pub fn attach(instance: &mut ServiceInstance) -> Option<i64> {
        match instance.new_certificate_id.take() {
            Some(new_id) => {
                let previous = instance.current_certificate_id.replace(new_id);
                tracing::debug!(
                    service_instance_id = %instance.id,
                    certificate_id = new_id,
                    previous_certificate_id = previous,
                    "Certificate attached"
                );
                previous.filter(|id| *id != new_id)
            }
            None => None,
        }
    }

    /// Whether `certificate` was requested for exactly the instance's domains
    pub fn matches_domains(instance: &ServiceInstance, certificate: &Certificate) -> bool {
        let mut requested: Vec<&str> = instance.domain_names.iter().map(String::as_str).collect();
        let mut issued: Vec<&str> = certificate
            .subject_alternative_names
            .iter()
            .map(String::as_str)
            .collect();
        requested.sort_unstable();
        issued.sort_unstable();
        requested == issued
    }

    /// Stop rotating in the pending certificate, e.g. one left behind by a
    /// failed update for another domain set; returns its id
    ///
    /// The row stays until the old-certificate cleanup removes it.
    pub fn abandon(instance: &mut ServiceInstance) -> Option<i64> {
        instance.new_certificate_id.take()
    }

    /// Certificates of the instance that are neither current nor rotating in
    pub fn superseded<'a>(
        instance: &ServiceInstance,
        certificates: &'a [Certificate],
    ) -> Vec<&'a Certificate> {
        certificates
            .iter()
            .filter(|cert| {
                Some(cert.id) != instance.current_certificate_id
                    && Some(cert.id) != instance.new_certificate_id
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceKind, NewCertificate};

    fn cert(id: i64) -> Certificate {
        Certificate::from_new(
            id,
            NewCertificate {
                service_instance_id: "4321".to_string(),
                subject_alternative_names: vec!["example.com".to_string()],
                private_key_pem: "key".to_string(),
                csr_pem: "csr".to_string(),
            },
        )
    }

    #[test]
    fn test_first_issuance_then_rotation() {
        let mut instance = ServiceInstance::new("4321", InstanceKind::Cdn, vec![]);
        assert_eq!(CertificateRotation::state(&instance), RotationState::Unissued);

        CertificateRotation::begin(&mut instance, 1).unwrap();
        assert_eq!(CertificateRotation::state(&instance), RotationState::Rotating);
        assert_eq!(CertificateRotation::attach(&mut instance), None);
        assert_eq!(CertificateRotation::state(&instance), RotationState::Stable);

        CertificateRotation::begin(&mut instance, 2).unwrap();
        assert_eq!(CertificateRotation::attach(&mut instance), Some(1));
        assert_eq!(instance.current_certificate_id, Some(2));
        assert_eq!(instance.new_certificate_id, None);
    }

    #[test]
    fn test_attach_twice_is_noop() {
        let mut instance = ServiceInstance::new("4321", InstanceKind::Alb, vec![]);
        CertificateRotation::begin(&mut instance, 5).unwrap();
        CertificateRotation::attach(&mut instance);
        assert_eq!(CertificateRotation::attach(&mut instance), None);
        assert_eq!(instance.current_certificate_id, Some(5));
    }

    #[test]
    fn test_current_cannot_rotate_in_again() {
        let mut instance = ServiceInstance::new("4321", InstanceKind::Alb, vec![]);
        instance.current_certificate_id = Some(3);
        assert!(CertificateRotation::begin(&mut instance, 3).is_err());
    }

    #[test]
    fn test_domain_match_ignores_order() {
        let instance = ServiceInstance::new(
            "4321",
            InstanceKind::Cdn,
            vec!["foo.com".to_string(), "example.com".to_string()],
        );
        let mut certificate = cert(1);
        certificate.subject_alternative_names = vec!["example.com".to_string(), "foo.com".to_string()];
        assert!(CertificateRotation::matches_domains(&instance, &certificate));

        certificate.subject_alternative_names = vec!["example.com".to_string(), "bar.com".to_string()];
        assert!(!CertificateRotation::matches_domains(&instance, &certificate));
    }

    #[test]
    fn test_abandon_leaves_current_in_place() {
        let mut instance = ServiceInstance::new("4321", InstanceKind::Cdn, vec![]);
        instance.current_certificate_id = Some(1);
        CertificateRotation::begin(&mut instance, 2).unwrap();

        assert_eq!(CertificateRotation::abandon(&mut instance), Some(2));
        assert_eq!(CertificateRotation::state(&instance), RotationState::Stable);
        assert_eq!(instance.current_certificate_id, Some(1));
        assert_eq!(CertificateRotation::abandon(&mut instance), None);
    }

    #[test]
    fn test_superseded_excludes_live_certificates() {
        let mut instance = ServiceInstance::new("4321", InstanceKind::Cdn, vec![]);
        instance.current_certificate_id = Some(2);
        instance.new_certificate_id = Some(3);
        let certificates = vec![cert(1), cert(2), cert(3), cert(4)];

        let ids: Vec<i64> = CertificateRotation::superseded(&instance, &certificates)
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![1, 4]);
    }
}
