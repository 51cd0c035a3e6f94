//! Service instance construct: IAM role, security group and a compute instance.

use strata_core::{Construct, Properties, ResourceHandle, Value};

use crate::error::StackResult;
use crate::network::Network;

/// Resolves to the latest Amazon Linux 2023 image at launch time.
pub const AL2023_IMAGE: &str =
    "resolve:ssm:/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-x86_64";

pub const SSM_MANAGED_POLICY: &str = "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore";

#[derive(Debug, Clone)]
pub struct InstanceProps {
    pub instance_type: String,
    /// Launch script, passed through unchanged.
    pub user_data: Option<String>,
}

impl Default for InstanceProps {
    fn default() -> Self {
        Self {
            instance_type: "t3.xlarge".to_string(),
            user_data: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub role: ResourceHandle,
    pub security_group: ResourceHandle,
    pub instance: ResourceHandle,
}

impl Instance {
    pub fn new(
        scope: &mut Construct,
        id: &str,
        network: &Network,
        props: &InstanceProps,
    ) -> StackResult<Self> {
        let node = scope.child(id)?;

        let role = node.define_resource(
            "EC2Role",
            "iam.role",
            Properties::new()
                .with("assumedBy", "ec2.amazonaws.com")
                .with("description", "Role for EC2")
                .with("managedPolicyArns", vec![SSM_MANAGED_POLICY]),
        )?;

        let security_group = node.define_resource(
            "InstanceSecurityGroup",
            "ec2.security_group",
            Properties::new()
                .with("vpcId", network.vpc.id())
                .with("description", "Used by the service instance")
                .with("allowAllOutbound", true),
        )?;

        let user_data = props
            .user_data
            .as_deref()
            .map(Value::from)
            .unwrap_or_else(Value::null);
        let instance = node.define_resource(
            "Instance",
            "ec2.instance",
            Properties::new()
                .with("instanceType", props.instance_type.as_str())
                .with("imageId", AL2023_IMAGE)
                .with("subnetId", network.public_subnets[0].id())
                .with("securityGroupIds", vec![security_group.id()])
                .with("roleArn", role.arn())
                .with("userData", user_data),
        )?;

        node.export("instanceId", instance.id());
        node.export("roleArn", role.arn());

        Ok(Self {
            role,
            security_group,
            instance,
        })
    }
}
