//! In-memory collaborators for tests
//!
//! Each fake keeps just enough state to behave like the real service
//! (not-found on missing resources, already-exists on duplicate names, etags
//! and lock tokens) and records every call in a shared [`CallLog`]. Calls can
//! be made to fail on demand.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::adapters::{
    AcmeAccount, AcmeClient, AcmeCredentials, Adapters, Alarms, Cdn, CertificateStore, ChangeStatus,
    Distribution, DistributionConfig, DistributionStatus, Dns01Challenge, DnsProvider, DnsRecord,
    LoadBalancer, LoadBalancerAddress, MetricAlarm, Notifications, ServerCertificate,
    ServerCertificateUpload, Shield, Waf, WebAcl, WebAclScope,
};
use crate::error::{AdapterError, AdapterResult};

/// Every adapter call in order, plus injected failures
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    next_failures: Mutex<HashMap<String, VecDeque<AdapterError>>>,
    always_failing: Mutex<HashMap<String, AdapterError>>,
}

impl CallLog {
    /// Record a call; returns the failure injected for it, if any
    pub fn record(&self, call: &str) -> AdapterResult<()> {
        self.calls.lock().push(call.to_string());

        if let Some(error) = self.always_failing.lock().get(call) {
            return Err(error.clone());
        }
        match self.next_failures.lock().get_mut(call).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|recorded| *recorded == call).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Fail the next `call` with `error`; queued failures apply in order
    pub fn fail_next(&self, call: &str, error: AdapterError) {
        self.next_failures
            .lock()
            .entry(call.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fail every `call` until [`CallLog::stop_failing`]
    pub fn fail_always(&self, call: &str, error: AdapterError) {
        self.always_failing.lock().insert(call.to_string(), error);
    }

    pub fn stop_failing(&self, call: &str) {
        self.always_failing.lock().remove(call);
        self.next_failures.lock().remove(call);
    }
}

fn next_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

/// CA that issues self-signed certificates for the ordered domains
#[derive(Debug)]
pub struct FakeAcme {
    log: Arc<CallLog>,
    accounts: AtomicU64,
}

impl FakeAcme {
    fn issue(domains: Vec<String>) -> AdapterResult<String> {
        let leaf = rcgen::generate_simple_self_signed(domains)
            .map_err(|e| AdapterError::other("acme", e.to_string()))?;
        let intermediate = rcgen::generate_simple_self_signed(vec!["intermediate.acme.test".to_string()])
            .map_err(|e| AdapterError::other("acme", e.to_string()))?;
        Ok(format!("{}{}", leaf.cert.pem(), intermediate.cert.pem()))
    }
}

#[async_trait]
impl AcmeClient for FakeAcme {
    async fn register_account(&self, email: &str, _account_key_pem: &str) -> AdapterResult<AcmeAccount> {
        self.log.record("acme.register_account")?;
        let id = next_id(&self.accounts);
        Ok(AcmeAccount {
            uri: format!("https://acme.test/acct/{id}"),
            registration_json: json!({ "status": "valid", "contact": [format!("mailto:{email}")] })
                .to_string(),
        })
    }

    async fn submit_order(
        &self,
        _account: &AcmeCredentials,
        _csr_pem: &str,
        domains: &[String],
    ) -> AdapterResult<String> {
        self.log.record("acme.submit_order")?;
        Ok(json!({ "status": "pending", "identifiers": domains }).to_string())
    }

    async fn dns01_challenge(
        &self,
        _account: &AcmeCredentials,
        _order_json: &str,
        domain: &str,
    ) -> AdapterResult<Dns01Challenge> {
        self.log.record("acme.dns01_challenge")?;
        Ok(Dns01Challenge {
            body_json: json!({ "type": "dns-01", "domain": domain, "token": format!("token-{domain}") })
                .to_string(),
            validation_domain: format!("_acme-challenge.{domain}"),
            validation_contents: format!("validation-{domain}"),
        })
    }

    async fn notify_challenge_ready(&self, _account: &AcmeCredentials, _body_json: &str) -> AdapterResult<()> {
        self.log.record("acme.notify_challenge_ready")
    }

    async fn finalize_and_poll(
        &self,
        _account: &AcmeCredentials,
        order_json: &str,
        _csr_pem: &str,
        _timeout: Duration,
    ) -> AdapterResult<String> {
        self.log.record("acme.finalize_and_poll")?;
        let order: serde_json::Value =
            serde_json::from_str(order_json).map_err(|e| AdapterError::rejected("acme", e.to_string()))?;
        let domains: Vec<String> = order["identifiers"]
            .as_array()
            .map(|ids| ids.iter().filter_map(|id| id.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if domains.is_empty() {
            return Err(AdapterError::rejected("acme", "order has no identifiers"));
        }
        Self::issue(domains)
    }
}

/// Hosted zone with change propagation and health checks
#[derive(Debug)]
pub struct FakeDns {
    log: Arc<CallLog>,
    records: Mutex<Vec<DnsRecord>>,
    /// Change id → polls left before it reports in sync
    changes: Mutex<HashMap<String, u32>>,
    pending_polls: AtomicU32,
    health_checks: Mutex<BTreeMap<String, String>>,
    counter: AtomicU64,
}

impl FakeDns {
    /// New changes report pending this many times before in sync
    pub fn set_pending_polls(&self, polls: u32) {
        self.pending_polls.store(polls, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.records.lock().clone()
    }

    pub fn has_record(&self, name: &str) -> bool {
        self.records.lock().iter().any(|record| record.name == name)
    }

    /// Simulate records deleted out of band
    pub fn clear_records(&self) {
        self.records.lock().clear();
    }

    pub fn health_check_ids(&self) -> Vec<String> {
        self.health_checks.lock().values().cloned().collect()
    }

    fn new_change(&self) -> String {
        let id = format!("C{}", next_id(&self.counter));
        self.changes
            .lock()
            .insert(id.clone(), self.pending_polls.load(Ordering::SeqCst));
        id
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn upsert_records(&self, _zone_id: &str, records: &[DnsRecord]) -> AdapterResult<String> {
        self.log.record("dns.upsert_records")?;
        let mut stored = self.records.lock();
        for record in records {
            stored.retain(|existing| !(existing.name == record.name && existing.record_type == record.record_type));
            stored.push(record.clone());
        }
        drop(stored);
        Ok(self.new_change())
    }

    async fn delete_records(&self, _zone_id: &str, records: &[DnsRecord]) -> AdapterResult<String> {
        self.log.record("dns.delete_records")?;
        let mut stored = self.records.lock();
        let before = stored.len();
        stored.retain(|existing| {
            !records
                .iter()
                .any(|record| existing.name == record.name && existing.record_type == record.record_type)
        });
        let removed = before - stored.len();
        drop(stored);

        if removed == 0 {
            return Err(AdapterError::not_found("dns", records.first().map_or("", |r| r.name.as_str())));
        }
        Ok(self.new_change())
    }

    async fn change_status(&self, change_id: &str) -> AdapterResult<ChangeStatus> {
        self.log.record("dns.change_status")?;
        let mut changes = self.changes.lock();
        let polls_left = changes
            .get_mut(change_id)
            .ok_or_else(|| AdapterError::not_found("dns", change_id))?;
        if *polls_left == 0 {
            Ok(ChangeStatus::InSync)
        } else {
            *polls_left -= 1;
            Ok(ChangeStatus::Pending)
        }
    }

    async fn create_health_check(&self, _domain: &str, caller_reference: &str) -> AdapterResult<String> {
        self.log.record("dns.create_health_check")?;
        let mut checks = self.health_checks.lock();
        if let Some(existing) = checks.get(caller_reference) {
            return Ok(existing.clone());
        }
        let id = format!("hc-{}", next_id(&self.counter));
        checks.insert(caller_reference.to_string(), id.clone());
        Ok(id)
    }

    async fn delete_health_check(&self, health_check_id: &str) -> AdapterResult<()> {
        self.log.record("dns.delete_health_check")?;
        let mut checks = self.health_checks.lock();
        let before = checks.len();
        checks.retain(|_, id| id != health_check_id);
        if checks.len() == before {
            return Err(AdapterError::not_found("dns", health_check_id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredCertificate {
    certificate: ServerCertificate,
    body: String,
    tags: BTreeMap<String, String>,
}

/// Server certificate store keyed by name
#[derive(Debug)]
pub struct FakeCertificateStore {
    log: Arc<CallLog>,
    certificates: Mutex<BTreeMap<String, StoredCertificate>>,
    counter: AtomicU64,
}

impl FakeCertificateStore {
    pub fn names(&self) -> Vec<String> {
        self.certificates.lock().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.certificates.lock().contains_key(name)
    }

    pub fn body(&self, name: &str) -> Option<String> {
        self.certificates.lock().get(name).map(|stored| stored.body.clone())
    }

    pub fn tags(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.certificates.lock().get(name).map(|stored| stored.tags.clone())
    }

    /// Simulate a certificate deleted out of band
    pub fn remove(&self, name: &str) {
        self.certificates.lock().remove(name);
    }
}

#[async_trait]
impl CertificateStore for FakeCertificateStore {
    async fn upload(&self, upload: &ServerCertificateUpload<'_>) -> AdapterResult<ServerCertificate> {
        self.log.record("certificate_store.upload")?;
        let mut certificates = self.certificates.lock();
        if certificates.contains_key(upload.name) {
            return Err(AdapterError::already_exists("certificate store", upload.name));
        }

        let id = next_id(&self.counter);
        let certificate = ServerCertificate {
            id: format!("ASCA{id:08}"),
            name: upload.name.to_string(),
            arn: format!(
                "arn:aws:iam::000000000000:server-certificate{}{}",
                upload.path, upload.name
            ),
        };
        certificates.insert(
            upload.name.to_string(),
            StoredCertificate {
                certificate: certificate.clone(),
                body: upload.certificate_body.to_string(),
                tags: BTreeMap::new(),
            },
        );
        Ok(certificate)
    }

    async fn get(&self, name: &str) -> AdapterResult<ServerCertificate> {
        self.log.record("certificate_store.get")?;
        self.certificates
            .lock()
            .get(name)
            .map(|stored| stored.certificate.clone())
            .ok_or_else(|| AdapterError::not_found("certificate store", name))
    }

    async fn delete(&self, name: &str) -> AdapterResult<()> {
        self.log.record("certificate_store.delete")?;
        self.certificates
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AdapterError::not_found("certificate store", name))
    }

    async fn tag(&self, name: &str, tags: &BTreeMap<String, String>) -> AdapterResult<()> {
        self.log.record("certificate_store.tag")?;
        let mut certificates = self.certificates.lock();
        let stored = certificates
            .get_mut(name)
            .ok_or_else(|| AdapterError::not_found("certificate store", name))?;
        stored.tags.extend(tags.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FakeListener {
    alb_arn: String,
    certificates: Vec<String>,
}

/// Load balancers and their HTTPS listeners
#[derive(Debug)]
pub struct FakeLoadBalancer {
    log: Arc<CallLog>,
    listeners: Mutex<BTreeMap<String, FakeListener>>,
}

impl FakeLoadBalancer {
    pub fn add_listener(&self, listener_arn: &str, alb_arn: &str) {
        self.listeners.lock().insert(
            listener_arn.to_string(),
            FakeListener {
                alb_arn: alb_arn.to_string(),
                certificates: Vec::new(),
            },
        );
    }

    pub fn certificates(&self, listener_arn: &str) -> Vec<String> {
        self.listeners
            .lock()
            .get(listener_arn)
            .map(|listener| listener.certificates.clone())
            .unwrap_or_default()
    }

    /// Put a certificate on a listener without going through the API
    pub fn attach(&self, listener_arn: &str, certificate_arn: &str) {
        if let Some(listener) = self.listeners.lock().get_mut(listener_arn) {
            listener.certificates.push(certificate_arn.to_string());
        }
    }

    /// Fill a listener with placeholder certificates
    pub fn fill(&self, listener_arn: &str, count: usize) {
        for n in 0..count {
            self.attach(listener_arn, &format!("{listener_arn}/placeholder-{n}"));
        }
    }
}

#[async_trait]
impl LoadBalancer for FakeLoadBalancer {
    async fn list_listener_certificates(&self, listener_arn: &str) -> AdapterResult<Vec<String>> {
        self.log.record("load_balancer.list_listener_certificates")?;
        self.listeners
            .lock()
            .get(listener_arn)
            .map(|listener| listener.certificates.clone())
            .ok_or_else(|| AdapterError::not_found("load balancer", listener_arn))
    }

    async fn add_listener_certificate(&self, listener_arn: &str, certificate_arn: &str) -> AdapterResult<()> {
        self.log.record("load_balancer.add_listener_certificate")?;
        let mut listeners = self.listeners.lock();
        let listener = listeners
            .get_mut(listener_arn)
            .ok_or_else(|| AdapterError::not_found("load balancer", listener_arn))?;
        if !listener.certificates.iter().any(|arn| arn == certificate_arn) {
            listener.certificates.push(certificate_arn.to_string());
        }
        Ok(())
    }

    async fn remove_listener_certificate(&self, listener_arn: &str, certificate_arn: &str) -> AdapterResult<()> {
        self.log.record("load_balancer.remove_listener_certificate")?;
        let mut listeners = self.listeners.lock();
        let listener = listeners
            .get_mut(listener_arn)
            .ok_or_else(|| AdapterError::not_found("load balancer", listener_arn))?;
        let before = listener.certificates.len();
        listener.certificates.retain(|arn| arn != certificate_arn);
        if listener.certificates.len() == before {
            return Err(AdapterError::not_found("load balancer", certificate_arn));
        }
        Ok(())
    }

    async fn describe_load_balancer(&self, alb_arn: &str) -> AdapterResult<LoadBalancerAddress> {
        self.log.record("load_balancer.describe_load_balancer")?;
        let name = alb_arn.rsplit('/').nth(1).unwrap_or(alb_arn);
        Ok(LoadBalancerAddress {
            dns_name: format!("{name}.elb.test"),
            hosted_zone_id: "ZALBTEST".to_string(),
        })
    }

    async fn listener_load_balancer(&self, listener_arn: &str) -> AdapterResult<String> {
        self.log.record("load_balancer.listener_load_balancer")?;
        self.listeners
            .lock()
            .get(listener_arn)
            .map(|listener| listener.alb_arn.clone())
            .ok_or_else(|| AdapterError::not_found("load balancer", listener_arn))
    }

    async fn list_https_listeners(&self, alb_arn: &str) -> AdapterResult<Vec<String>> {
        self.log.record("load_balancer.list_https_listeners")?;
        Ok(self
            .listeners
            .lock()
            .iter()
            .filter(|(_, listener)| listener.alb_arn == alb_arn)
            .map(|(arn, _)| arn.clone())
            .collect())
    }
}

#[derive(Debug, Clone)]
struct FakeDistribution {
    distribution: Distribution,
    config: DistributionConfig,
    etag: u64,
    polls_until_deployed: u32,
}

/// CDN with etags and deployment latency
#[derive(Debug)]
pub struct FakeCdn {
    log: Arc<CallLog>,
    distributions: Mutex<BTreeMap<String, FakeDistribution>>,
    deploy_polls: AtomicU32,
    counter: AtomicU64,
}

impl FakeCdn {
    /// Changes report in progress this many times before deployed
    pub fn set_deploy_polls(&self, polls: u32) {
        self.deploy_polls.store(polls, Ordering::SeqCst);
    }

    pub fn distribution(&self, id: &str) -> Option<(Distribution, DistributionConfig)> {
        self.distributions
            .lock()
            .get(id)
            .map(|stored| (stored.distribution.clone(), stored.config.clone()))
    }

    pub fn count(&self) -> usize {
        self.distributions.lock().len()
    }

    /// A distribution created outside the broker
    pub fn insert_existing(&self, config: DistributionConfig) -> Distribution {
        self.store(config)
    }

    /// Simulate a distribution deleted out of band
    pub fn remove(&self, id: &str) {
        self.distributions.lock().remove(id);
    }

    fn store(&self, config: DistributionConfig) -> Distribution {
        let n = next_id(&self.counter);
        let id = format!("E{n:06}");
        let distribution = Distribution {
            arn: format!("arn:aws:cloudfront::000000000000:distribution/{id}"),
            domain_name: format!("d{n}.cloudfront.test"),
            id: id.clone(),
        };
        self.distributions.lock().insert(
            id,
            FakeDistribution {
                distribution: distribution.clone(),
                config,
                etag: 1,
                polls_until_deployed: self.deploy_polls.load(Ordering::SeqCst),
            },
        );
        distribution
    }
}

#[async_trait]
impl Cdn for FakeCdn {
    async fn create_distribution(
        &self,
        config: &DistributionConfig,
        _tags: &BTreeMap<String, String>,
    ) -> AdapterResult<Distribution> {
        self.log.record("cdn.create_distribution")?;
        let taken = self
            .distributions
            .lock()
            .values()
            .any(|stored| stored.config.caller_reference == config.caller_reference);
        if taken {
            return Err(AdapterError::already_exists("cdn", &config.caller_reference));
        }
        Ok(self.store(config.clone()))
    }

    async fn find_distribution(&self, caller_reference: &str) -> AdapterResult<Option<Distribution>> {
        self.log.record("cdn.find_distribution")?;
        Ok(self
            .distributions
            .lock()
            .values()
            .find(|stored| stored.config.caller_reference == caller_reference)
            .map(|stored| stored.distribution.clone()))
    }

    async fn get_distribution(&self, id: &str) -> AdapterResult<Distribution> {
        self.log.record("cdn.get_distribution")?;
        self.distributions
            .lock()
            .get(id)
            .map(|stored| stored.distribution.clone())
            .ok_or_else(|| AdapterError::not_found("cdn", id))
    }

    async fn get_distribution_config(&self, id: &str) -> AdapterResult<(DistributionConfig, String)> {
        self.log.record("cdn.get_distribution_config")?;
        self.distributions
            .lock()
            .get(id)
            .map(|stored| (stored.config.clone(), stored.etag.to_string()))
            .ok_or_else(|| AdapterError::not_found("cdn", id))
    }

    async fn update_distribution(&self, id: &str, config: &DistributionConfig, etag: &str) -> AdapterResult<()> {
        self.log.record("cdn.update_distribution")?;
        let mut distributions = self.distributions.lock();
        let stored = distributions
            .get_mut(id)
            .ok_or_else(|| AdapterError::not_found("cdn", id))?;
        if stored.etag.to_string() != etag {
            return Err(AdapterError::conflict("cdn", id));
        }
        stored.config = config.clone();
        stored.etag += 1;
        stored.polls_until_deployed = self.deploy_polls.load(Ordering::SeqCst);
        Ok(())
    }

    async fn get_status(&self, id: &str) -> AdapterResult<DistributionStatus> {
        self.log.record("cdn.get_status")?;
        let mut distributions = self.distributions.lock();
        let stored = distributions
            .get_mut(id)
            .ok_or_else(|| AdapterError::not_found("cdn", id))?;
        if stored.polls_until_deployed == 0 {
            Ok(DistributionStatus::Deployed)
        } else {
            stored.polls_until_deployed -= 1;
            Ok(DistributionStatus::InProgress)
        }
    }

    async fn delete_distribution(&self, id: &str, etag: &str) -> AdapterResult<()> {
        self.log.record("cdn.delete_distribution")?;
        let mut distributions = self.distributions.lock();
        let stored = distributions
            .get(id)
            .ok_or_else(|| AdapterError::not_found("cdn", id))?;
        if stored.etag.to_string() != etag || stored.config.enabled {
            return Err(AdapterError::conflict("cdn", id));
        }
        distributions.remove(id);
        Ok(())
    }
}

fn scope_key(name: &str, scope: WebAclScope) -> String {
    format!("{scope:?}/{name}")
}

/// Web ACLs with lock tokens
#[derive(Debug)]
pub struct FakeWaf {
    log: Arc<CallLog>,
    web_acls: Mutex<BTreeMap<String, (WebAcl, u64)>>,
    associations: Mutex<BTreeMap<String, String>>,
    counter: AtomicU64,
}

impl FakeWaf {
    pub fn web_acl_names(&self) -> Vec<String> {
        self.web_acls.lock().values().map(|(acl, _)| acl.name.clone()).collect()
    }

    /// Web ACL associated with a resource
    pub fn association(&self, resource_arn: &str) -> Option<String> {
        self.associations.lock().get(resource_arn).cloned()
    }
}

#[async_trait]
impl Waf for FakeWaf {
    async fn create_web_acl(
        &self,
        name: &str,
        scope: WebAclScope,
        _rule_group_arns: &[String],
        _tags: &BTreeMap<String, String>,
    ) -> AdapterResult<WebAcl> {
        self.log.record("waf.create_web_acl")?;
        let key = scope_key(name, scope);
        let mut web_acls = self.web_acls.lock();
        if web_acls.contains_key(&key) {
            return Err(AdapterError::already_exists("waf", name));
        }

        let id = format!("acl-{}", next_id(&self.counter));
        let web_acl = WebAcl {
            arn: format!("arn:aws:wafv2:::{}/webacl/{name}/{id}", key.to_lowercase()),
            name: name.to_string(),
            id,
        };
        web_acls.insert(key, (web_acl.clone(), 1));
        Ok(web_acl)
    }

    async fn get_web_acl(&self, name: &str, scope: WebAclScope) -> AdapterResult<(WebAcl, String)> {
        self.log.record("waf.get_web_acl")?;
        self.web_acls
            .lock()
            .get(&scope_key(name, scope))
            .map(|(acl, lock)| (acl.clone(), lock.to_string()))
            .ok_or_else(|| AdapterError::not_found("waf", name))
    }

    async fn delete_web_acl(&self, web_acl: &WebAcl, scope: WebAclScope, lock_token: &str) -> AdapterResult<()> {
        self.log.record("waf.delete_web_acl")?;
        let key = scope_key(&web_acl.name, scope);
        let mut web_acls = self.web_acls.lock();
        let (_, lock) = web_acls
            .get(&key)
            .ok_or_else(|| AdapterError::not_found("waf", &web_acl.name))?;
        if lock.to_string() != lock_token {
            return Err(AdapterError::conflict("waf", &web_acl.name));
        }
        web_acls.remove(&key);
        Ok(())
    }

    async fn associate_web_acl(&self, web_acl_arn: &str, resource_arn: &str) -> AdapterResult<()> {
        self.log.record("waf.associate_web_acl")?;
        self.associations
            .lock()
            .insert(resource_arn.to_string(), web_acl_arn.to_string());
        Ok(())
    }
}

/// DDoS protections and their health check associations
#[derive(Debug)]
pub struct FakeShield {
    log: Arc<CallLog>,
    protections: Mutex<BTreeMap<String, String>>,
    associations: Mutex<BTreeMap<String, String>>,
    counter: AtomicU64,
}

impl FakeShield {
    /// Protect a resource; returns the protection id
    pub fn protect(&self, resource_arn: &str) -> String {
        let id = format!("protection-{}", next_id(&self.counter));
        self.protections
            .lock()
            .insert(resource_arn.to_string(), id.clone());
        id
    }

    pub fn associated_health_check(&self, protection_id: &str) -> Option<String> {
        self.associations.lock().get(protection_id).cloned()
    }
}

#[async_trait]
impl Shield for FakeShield {
    async fn find_protection_id(&self, resource_arn: &str) -> AdapterResult<Option<String>> {
        self.log.record("shield.find_protection_id")?;
        Ok(self.protections.lock().get(resource_arn).cloned())
    }

    async fn associate_health_check(&self, protection_id: &str, health_check_arn: &str) -> AdapterResult<()> {
        self.log.record("shield.associate_health_check")?;
        self.associations
            .lock()
            .insert(protection_id.to_string(), health_check_arn.to_string());
        Ok(())
    }

    async fn disassociate_health_check(&self, protection_id: &str, _health_check_arn: &str) -> AdapterResult<()> {
        self.log.record("shield.disassociate_health_check")?;
        self.associations
            .lock()
            .remove(protection_id)
            .map(|_| ())
            .ok_or_else(|| AdapterError::not_found("shield", protection_id))
    }
}

#[derive(Debug)]
pub struct FakeAlarms {
    log: Arc<CallLog>,
    alarms: Mutex<BTreeMap<String, MetricAlarm>>,
}

impl FakeAlarms {
    pub fn alarm_names(&self) -> Vec<String> {
        self.alarms.lock().keys().cloned().collect()
    }

    pub fn alarm(&self, name: &str) -> Option<MetricAlarm> {
        self.alarms.lock().get(name).cloned()
    }
}

#[async_trait]
impl Alarms for FakeAlarms {
    async fn put_metric_alarm(&self, alarm: &MetricAlarm) -> AdapterResult<()> {
        self.log.record("alarms.put_metric_alarm")?;
        self.alarms.lock().insert(alarm.name.clone(), alarm.clone());
        Ok(())
    }

    async fn alarm_exists(&self, name: &str) -> AdapterResult<bool> {
        self.log.record("alarms.alarm_exists")?;
        Ok(self.alarms.lock().contains_key(name))
    }

    async fn delete_alarms(&self, names: &[String]) -> AdapterResult<()> {
        self.log.record("alarms.delete_alarms")?;
        let mut alarms = self.alarms.lock();
        let removed = names.iter().filter(|name| alarms.remove(*name).is_some()).count();
        if removed == 0 {
            return Err(AdapterError::not_found("alarms", names.join(",")));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeNotifications {
    log: Arc<CallLog>,
    topics: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl FakeNotifications {
    pub fn topic_arns(&self) -> Vec<String> {
        self.topics.lock().keys().cloned().collect()
    }

    pub fn subscribers(&self, topic_arn: &str) -> Vec<String> {
        self.topics
            .lock()
            .get(topic_arn)
            .map(|emails| emails.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifications for FakeNotifications {
    async fn create_topic(&self, name: &str, _tags: &BTreeMap<String, String>) -> AdapterResult<String> {
        self.log.record("notifications.create_topic")?;
        let arn = format!("arn:aws:sns:us-gov-west-1:000000000000:{name}");
        self.topics.lock().entry(arn.clone()).or_default();
        Ok(arn)
    }

    async fn subscribe_email(&self, topic_arn: &str, email: &str) -> AdapterResult<()> {
        self.log.record("notifications.subscribe_email")?;
        self.topics
            .lock()
            .get_mut(topic_arn)
            .ok_or_else(|| AdapterError::not_found("notifications", topic_arn))?
            .insert(email.to_string());
        Ok(())
    }

    async fn delete_topic(&self, topic_arn: &str) -> AdapterResult<()> {
        self.log.record("notifications.delete_topic")?;
        self.topics
            .lock()
            .remove(topic_arn)
            .map(|_| ())
            .ok_or_else(|| AdapterError::not_found("notifications", topic_arn))
    }
}

/// Every fake sharing one call log
#[derive(Debug, Clone)]
pub struct FakeCloud {
    pub log: Arc<CallLog>,
    pub acme: Arc<FakeAcme>,
    pub dns: Arc<FakeDns>,
    pub certificate_store: Arc<FakeCertificateStore>,
    pub load_balancer: Arc<FakeLoadBalancer>,
    pub cdn: Arc<FakeCdn>,
    pub waf: Arc<FakeWaf>,
    pub shield: Arc<FakeShield>,
    pub alarms: Arc<FakeAlarms>,
    pub notifications: Arc<FakeNotifications>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        let log = Arc::new(CallLog::default());
        Self {
            acme: Arc::new(FakeAcme {
                log: log.clone(),
                accounts: AtomicU64::new(0),
            }),
            dns: Arc::new(FakeDns {
                log: log.clone(),
                records: Mutex::new(Vec::new()),
                changes: Mutex::new(HashMap::new()),
                pending_polls: AtomicU32::new(0),
                health_checks: Mutex::new(BTreeMap::new()),
                counter: AtomicU64::new(0),
            }),
            certificate_store: Arc::new(FakeCertificateStore {
                log: log.clone(),
                certificates: Mutex::new(BTreeMap::new()),
                counter: AtomicU64::new(0),
            }),
            load_balancer: Arc::new(FakeLoadBalancer {
                log: log.clone(),
                listeners: Mutex::new(BTreeMap::new()),
            }),
            cdn: Arc::new(FakeCdn {
                log: log.clone(),
                distributions: Mutex::new(BTreeMap::new()),
                deploy_polls: AtomicU32::new(0),
                counter: AtomicU64::new(0),
            }),
            waf: Arc::new(FakeWaf {
                log: log.clone(),
                web_acls: Mutex::new(BTreeMap::new()),
                associations: Mutex::new(BTreeMap::new()),
                counter: AtomicU64::new(0),
            }),
            shield: Arc::new(FakeShield {
                log: log.clone(),
                protections: Mutex::new(BTreeMap::new()),
                associations: Mutex::new(BTreeMap::new()),
                counter: AtomicU64::new(0),
            }),
            alarms: Arc::new(FakeAlarms {
                log: log.clone(),
                alarms: Mutex::new(BTreeMap::new()),
            }),
            notifications: Arc::new(FakeNotifications {
                log: log.clone(),
                topics: Mutex::new(BTreeMap::new()),
            }),
            log,
        }
    }

    pub fn adapters(&self) -> Adapters {
        Adapters {
            acme: self.acme.clone(),
            dns: self.dns.clone(),
            certificate_store: self.certificate_store.clone(),
            load_balancer: self.load_balancer.clone(),
            cdn: self.cdn.clone(),
            waf: self.waf.clone(),
            shield: self.shield.clone(),
            alarms: self.alarms.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_failures_apply_in_order() {
        let log = CallLog::default();
        log.fail_next("dns.upsert_records", AdapterError::transient("dns", "throttled"));

        assert!(log.record("dns.upsert_records").is_err());
        assert!(log.record("dns.upsert_records").is_ok());
        assert_eq!(log.count("dns.upsert_records"), 2);
    }

    #[tokio::test]
    async fn test_acme_issues_certificate_for_ordered_domains() {
        let cloud = FakeCloud::new();
        let account = AcmeCredentials {
            uri: "https://acme.test/acct/1".to_string(),
            private_key_pem: String::new(),
        };
        let domains = vec!["example.com".to_string(), "foo.com".to_string()];
        let order = cloud.acme.submit_order(&account, "csr", &domains).await.unwrap();

        let fullchain = cloud
            .acme
            .finalize_and_poll(&account, &order, "csr", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(fullchain.matches("BEGIN CERTIFICATE").count(), 2);
    }

    #[tokio::test]
    async fn test_cdn_rejects_stale_etag() {
        let cloud = FakeCloud::new();
        let distribution = cloud.cdn.insert_existing(DistributionConfig::default());
        let (config, etag) = cloud.cdn.get_distribution_config(&distribution.id).await.unwrap();

        cloud.cdn.update_distribution(&distribution.id, &config, &etag).await.unwrap();
        let stale = cloud.cdn.update_distribution(&distribution.id, &config, &etag).await;
        assert!(stale.unwrap_err().is_conflict());
    }
}
