//! Database construct: a Postgres instance in the network's subnet group.

use strata_core::{Construct, Properties, ResourceHandle};

use crate::error::StackResult;
use crate::network::Network;

pub const DATABASE_NAME: &str = "finance";
pub const POSTGRES_PORT: u32 = 5432;

/// Handles to the database resources.
#[derive(Debug, Clone)]
pub struct Database {
    pub security_group: ResourceHandle,
    /// Generated master credentials.
    pub secret: ResourceHandle,
    pub instance: ResourceHandle,
}

impl Database {
    pub fn new(scope: &mut Construct, id: &str, network: &Network) -> StackResult<Self> {
        let node = scope.child(id)?;

        let security_group = node.define_resource(
            "DatabaseSecurityGroup",
            "ec2.security_group",
            Properties::new()
                .with("vpcId", network.vpc.id())
                .with("description", "Used by RDS")
                .with("allowAllOutbound", true),
        )?;

        let secret = node.define_resource(
            "Secret",
            "secretsmanager.secret",
            Properties::new()
                .with("description", "Generated postgres credentials")
                .with("username", "postgres")
                .with("generatePassword", true)
                .with("excludeCharacters", " %+~`#$&*()|[]{}:;<>?!'/@\"\\"),
        )?;

        let instance = node.define_resource(
            "Database",
            "rds.instance",
            Properties::new()
                .with("engine", "postgres")
                .with("databaseName", DATABASE_NAME)
                .with("instanceClass", "db.t3.micro")
                .with("allocatedStorageGiB", 20u32)
                .with("storageEncrypted", true)
                .with("caCertificate", "rds-ca-rsa2048-g1")
                .with("port", POSTGRES_PORT)
                .with("masterSecretArn", secret.arn())
                .with("subnetGroupName", network.subnet_group.output("name"))
                .with("securityGroupIds", vec![security_group.id()]),
        )?;

        node.export("secretArn", secret.arn());
        node.export("databaseArn", instance.arn());

        Ok(Self {
            security_group,
            secret,
            instance,
        })
    }
}
