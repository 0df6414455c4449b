//! Notification topic and metric alarms for the dedicated WAF plan

use async_trait::async_trait;
use tracing::{debug, info};

use super::resource_tags;
use crate::adapters::{poll_until, MetricAlarm};
use crate::constants::{naming, step_descriptions};
use crate::error::{AdapterResultExt, Result};
use crate::models::{HealthCheckAlarm, Operation};
use crate::pipeline::{Step, StepContext, StepId};

async fn wait_for_alarm(ctx: &StepContext, name: &str) -> Result<()> {
    let alarms = &ctx.adapters.alarms;
    poll_until(
        "alarm creation",
        ctx.config.alarms.poll_interval(),
        ctx.config.alarms.max_poll_attempts,
        move || async move { alarms.alarm_exists(name).await },
    )
    .await
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateSnsTopic;

#[async_trait]
impl Step for CreateSnsTopic {
    fn id(&self) -> StepId {
        StepId::CreateSnsTopic
    }

    fn description(&self) -> &'static str {
        step_descriptions::CREATE_SNS_TOPIC
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.dedicated_waf.sns_notification_topic_arn.is_some() {
            return Ok(());
        }

        let name = naming::sns_topic_name(&ctx.config.alarms.name_prefix, &instance.id);
        let topic_arn = ctx
            .adapters
            .notifications
            .create_topic(&name, &resource_tags(ctx, &instance))
            .await?;
        instance.dedicated_waf.sns_notification_topic_arn = Some(topic_arn.clone());
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, topic_arn = %topic_arn, "Notification topic created");
        Ok(())
    }
}

/// Subscribe the instance's contact, else the broker-wide one
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeSnsTopic;

#[async_trait]
impl Step for SubscribeSnsTopic {
    fn id(&self) -> StepId {
        StepId::SubscribeSnsTopic
    }

    fn description(&self) -> &'static str {
        step_descriptions::SUBSCRIBE_SNS_TOPIC
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let Some(topic_arn) = instance.dedicated_waf.sns_notification_topic_arn.as_deref() else {
            return Ok(());
        };
        let email = instance
            .dedicated_waf
            .alarm_notification_email
            .as_deref()
            .or(ctx.config.alarms.notification_email.as_deref());

        match email {
            Some(email) => {
                ctx.adapters.notifications.subscribe_email(topic_arn, email).await?;
                info!(service_instance_id = %instance.id, "Notification email subscribed");
            }
            None => debug!(service_instance_id = %instance.id, "No notification email configured"),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteSnsTopic;

#[async_trait]
impl Step for DeleteSnsTopic {
    fn id(&self) -> StepId {
        StepId::DeleteSnsTopic
    }

    fn description(&self) -> &'static str {
        step_descriptions::DELETE_SNS_TOPIC
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let Some(topic_arn) = instance.dedicated_waf.sns_notification_topic_arn.take() else {
            return Ok(());
        };

        ctx.adapters
            .notifications
            .delete_topic(&topic_arn)
            .await
            .ignore_not_found()?;
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, "Notification topic deleted");
        Ok(())
    }
}

/// One unhealthy-endpoint alarm per health check
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateHealthCheckAlarms;

#[async_trait]
impl Step for CreateHealthCheckAlarms {
    fn id(&self) -> StepId {
        StepId::CreateHealthCheckAlarms
    }

    fn description(&self) -> &'static str {
        step_descriptions::CREATE_HEALTH_CHECK_ALARMS
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let tags = resource_tags(ctx, &instance);
        let topic = instance.dedicated_waf.sns_notification_topic_arn.clone();

        for health_check in instance.dedicated_waf.health_checks.clone() {
            let exists = instance
                .dedicated_waf
                .health_check_alarms
                .iter()
                .any(|alarm| alarm.health_check_id == health_check.health_check_id);
            if exists {
                continue;
            }

            let name = naming::health_check_alarm_name(
                &ctx.config.alarms.name_prefix,
                &instance.id,
                &health_check.health_check_id,
            );
            let alarm = MetricAlarm::health_check(name.clone(), &health_check.health_check_id, topic.as_deref())
                .with_tags(tags.clone());
            ctx.adapters.alarms.put_metric_alarm(&alarm).await?;
            wait_for_alarm(ctx, &name).await?;

            instance.dedicated_waf.health_check_alarms.push(HealthCheckAlarm {
                health_check_id: health_check.health_check_id,
                alarm_name: name,
            });
            ctx.store.update_instance(&instance).await?;
        }
        Ok(())
    }
}

/// Alarm on DDoS detection for the distribution
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateDdosAlarm;

#[async_trait]
impl Step for CreateDdosAlarm {
    fn id(&self) -> StepId {
        StepId::CreateDdosAlarm
    }

    fn description(&self) -> &'static str {
        step_descriptions::CREATE_DDOS_ALARM
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.dedicated_waf.ddos_detected_alarm_name.is_some() {
            return Ok(());
        }
        let Some(distribution_arn) = instance.cdn.distribution_arn.clone() else {
            return Ok(());
        };

        let name = naming::ddos_alarm_name(&ctx.config.alarms.name_prefix, &instance.id);
        let alarm = MetricAlarm::ddos_detected(
            name.clone(),
            &distribution_arn,
            instance.dedicated_waf.sns_notification_topic_arn.as_deref(),
        )
        .with_tags(resource_tags(ctx, &instance));
        ctx.adapters.alarms.put_metric_alarm(&alarm).await?;
        wait_for_alarm(ctx, &name).await?;

        instance.dedicated_waf.ddos_detected_alarm_name = Some(name);
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, "DDoS alarm created");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteAlarms;

#[async_trait]
impl Step for DeleteAlarms {
    fn id(&self) -> StepId {
        StepId::DeleteAlarms
    }

    fn description(&self) -> &'static str {
        step_descriptions::DELETE_ALARMS
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let mut names: Vec<String> = instance
            .dedicated_waf
            .health_check_alarms
            .iter()
            .map(|alarm| alarm.alarm_name.clone())
            .collect();
        names.extend(instance.dedicated_waf.ddos_detected_alarm_name.clone());
        if names.is_empty() {
            return Ok(());
        }

        ctx.adapters
            .alarms
            .delete_alarms(&names)
            .await
            .ignore_not_found()?;
        instance.dedicated_waf.health_check_alarms.clear();
        instance.dedicated_waf.ddos_detected_alarm_name = None;
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, deleted = names.len(), "Alarms deleted");
        Ok(())
    }
}
