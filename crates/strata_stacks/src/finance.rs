//! The finance stack: network, Postgres, one service instance and an app bucket.

use strata_core::{Composition, Construct, Properties, ResourceHandle, Value};
use tracing::info;

use crate::database::{Database, POSTGRES_PORT};
use crate::error::StackResult;
use crate::instance::{Instance, InstanceProps};
use crate::network::{HostedZone, Network, NetworkProps};
use crate::vars::StackVars;

pub const STACK_NAME: &str = "FinanceInfrastructureStack";
pub const DEFAULT_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_ZONE_ID: &str = "Z0193474KXYSB0F637HC";
pub const DEFAULT_ZONE_NAME: &str = "breadmanager.com";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Bootstrap script for the service instance. `BUCKET_PARAM` is exported
/// from the instance's `bucketParameterName` property.
pub const SERVICE_USER_DATA: &str = r#"#!/bin/bash
dnf update -y
dnf install git docker -y
systemctl start docker
systemctl enable docker
usermod -aG docker ssm-user

mkdir -p /usr/local/lib/docker/cli-plugins
curl -L "https://github.com/docker/compose/releases/download/v2.29.1/docker-compose-linux-x86_64" -o /usr/local/lib/docker/cli-plugins/docker-compose
chmod +x /usr/local/lib/docker/cli-plugins/docker-compose
curl -LsSf https://astral.sh/uv/install.sh | sh
source $HOME/.cargo/env

BUCKET_NAME=$(aws ssm get-parameter --name "$BUCKET_PARAM" --query Parameter.Value --output text)
"#;

/// Everything the finance stack declares, for callers that want to extend it.
#[derive(Debug, Clone)]
pub struct FinanceStack {
    pub network: Network,
    pub database: Database,
    pub service: Instance,
    pub app_bucket: ResourceHandle,
    pub bucket_name_param: ResourceHandle,
}

impl FinanceStack {
    /// Build the composition.
    ///
    /// Variables: `cidr`, `zone_id`, `zone_name`, `region`, `bucket_name`,
    /// `instance_type`.
    pub fn build(vars: &StackVars) -> StackResult<Composition> {
        let mut app = Composition::new(STACK_NAME);
        let stack = Self::declare(app.root_mut(), vars)?;
        info!(
            "Declared {} with {} resources (database {})",
            STACK_NAME,
            app.resources().len(),
            stack.database.instance.path()
        );
        Ok(app)
    }

    /// Declare the stack's constructs under `root`.
    pub fn declare(root: &mut Construct, vars: &StackVars) -> StackResult<Self> {
        let zone = HostedZone::new(
            vars.get_or("zone_id", DEFAULT_ZONE_ID),
            vars.get_or("zone_name", DEFAULT_ZONE_NAME),
        );
        let region = vars.get_or("region", DEFAULT_REGION);
        let default_bucket = format!("{}-appbucket", STACK_NAME.to_lowercase());
        let bucket_name = vars.get_or("bucket_name", &default_bucket).to_string();

        let app_bucket = root.define_resource(
            "AppBucket",
            "s3.bucket",
            Properties::new()
                .with("bucketName", bucket_name)
                .with("region", region)
                .with("blockPublicAccess", "BLOCK_ALL")
                .with("encryption", "S3_MANAGED")
                .with("enforceSsl", true)
                .with("versioned", true)
                .with("removalPolicy", "retain"),
        )?;

        let bucket_name_param = root.define_resource(
            "AppBucketNameParam",
            "ssm.parameter",
            Properties::new()
                .with("name", format!("/{}/app-bucket-name", STACK_NAME))
                .with("type", "String")
                .with("value", app_bucket.output("bucketName")),
        )?;

        let network = Network::new(
            root,
            "Network",
            &NetworkProps {
                cidr: vars.get_or("cidr", DEFAULT_CIDR).to_string(),
                hosted_zones: vec![zone],
            },
        )?;
        let database = Database::new(root, "Database", &network)?;
        let service = Instance::new(
            root,
            "Service",
            &network,
            &InstanceProps {
                instance_type: vars.get_or("instance_type", "t3.xlarge").to_string(),
                user_data: Some(SERVICE_USER_DATA.to_string()),
            },
        )?;
        root.set_property(
            &service.instance,
            "bucketParameterName",
            bucket_name_param.output("name"),
        )?;

        root.define_resource(
            "DatabaseIngressFromService",
            "ec2.security_group_ingress",
            Properties::new()
                .with("groupId", database.security_group.id())
                .with("sourceSecurityGroupId", service.security_group.id())
                .with("protocol", "tcp")
                .with("port", POSTGRES_PORT)
                .with("description", "EC2 to Postgres"),
        )?;

        grant_read(
            root,
            "ServiceReadsDatabaseSecret",
            &service.role,
            &database.secret,
            &["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
        )?;
        grant_read(
            root,
            "ServiceReadsAppBucket",
            &service.role,
            &app_bucket,
            &["s3:GetObject*", "s3:GetBucket*", "s3:List*"],
        )?;
        grant_read(
            root,
            "ServiceReadsBucketNameParam",
            &service.role,
            &bucket_name_param,
            &["ssm:GetParameter", "ssm:GetParameters", "ssm:DescribeParameters"],
        )?;

        root.export("bucketName", app_bucket.output("bucketName"));
        root.export("loadBalancerArn", network.load_balancer.arn());

        Ok(Self {
            network,
            database,
            service,
            app_bucket,
            bucket_name_param,
        })
    }
}

/// An inline policy letting `role` read `target`.
fn grant_read(
    root: &mut Construct,
    name: &str,
    role: &ResourceHandle,
    target: &ResourceHandle,
    actions: &[&str],
) -> StackResult<ResourceHandle> {
    Ok(root.define_resource(
        name,
        "iam.policy",
        Properties::new()
            .with("roleArn", role.arn())
            .with("effect", "Allow")
            .with("actions", actions.iter().map(|a| Value::from(*a)).collect::<Vec<_>>())
            .with("resourceArns", vec![target.arn()]),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Action, AppliedStates, Planner};

    #[test]
    fn test_finance_stack_plans_cleanly() {
        let app = FinanceStack::build(&StackVars::new()).unwrap();
        let plan = Planner::new().plan(&app, &AppliedStates::new()).unwrap();

        assert_eq!(plan.len(), app.resources().len());
        assert!(plan.steps.iter().all(|s| s.action == Action::Create));

        let position = |path: &str| plan.steps.iter().position(|s| s.logical_path == path).unwrap();
        assert!(position("Network/Vpc") < position("Network/PublicSubnet1"));
        assert!(position("Network/SubnetGroupAll") < position("Database/Database"));
        assert!(position("Database/Secret") < position("ServiceReadsDatabaseSecret"));
        assert!(position("AppBucketNameParam") < position("Service/Instance"));
    }

    #[test]
    fn test_ingress_links_both_security_groups() {
        let app = FinanceStack::build(&StackVars::new()).unwrap();
        let ingress = app
            .resources()
            .into_iter()
            .find(|r| r.logical_path == "DatabaseIngressFromService")
            .unwrap();

        let deps = ingress.dependencies();
        assert!(deps.contains("Database/DatabaseSecurityGroup"));
        assert!(deps.contains("Service/InstanceSecurityGroup"));
        assert_eq!(ingress.properties.get("port"), Some(&Value::from(5432u32)));
    }

    #[test]
    fn test_vars_override_zone() {
        let vars = StackVars::new()
            .with("zone_name", "example.org")
            .with("zone_id", "ZEXAMPLE");
        let app = FinanceStack::build(&vars).unwrap();
        assert!(app.handle("Network/example.orgCertificate").is_ok());
        assert!(app.handle("Network/breadmanager.comCertificate").is_err());
    }
}
