//! Network construct: VPC, public subnets, endpoints, load balancer and DNS.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::json;

use strata_core::{Construct, Properties, ResourceHandle, Value};

use crate::error::{StackError, StackResult};

/// Availability zones spanned by the VPC; one public subnet each.
pub const MAX_AZS: u32 = 3;

const SUBNET_MASK: u8 = 24;

/// An existing public hosted zone, looked up by id rather than created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    pub id: String,
    pub name: String,
}

impl HostedZone {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkProps {
    pub cidr: String,
    pub hosted_zones: Vec<HostedZone>,
}

/// Handles to everything the network declares.
#[derive(Debug, Clone)]
pub struct Network {
    pub vpc: ResourceHandle,
    pub public_subnets: Vec<ResourceHandle>,
    pub subnet_group: ResourceHandle,
    pub load_balancer: ResourceHandle,
    /// Certificate per hosted zone name.
    pub certificates: BTreeMap<String, ResourceHandle>,
    pub https_listener: ResourceHandle,
}

impl Network {
    pub fn new(scope: &mut Construct, id: &str, props: &NetworkProps) -> StackResult<Self> {
        let first_zone = props.hosted_zones.first().ok_or_else(|| {
            StackError::InvalidProps("network needs at least one hosted zone".to_string())
        })?;
        let subnet_cidrs = public_subnet_cidrs(&props.cidr)?;
        let node = scope.child(id)?;

        let vpc = node.define_resource(
            "Vpc",
            "ec2.vpc",
            Properties::new()
                .with("cidrBlock", props.cidr.as_str())
                .with("maxAzs", MAX_AZS)
                .with("enableDnsHostnames", true)
                .with("enableDnsSupport", true),
        )?;

        let mut public_subnets = Vec::with_capacity(subnet_cidrs.len());
        for (i, cidr) in subnet_cidrs.iter().enumerate() {
            let subnet = node.define_resource(
                &format!("PublicSubnet{}", i + 1),
                "ec2.subnet",
                Properties::new()
                    .with("vpcId", vpc.id())
                    .with("cidrBlock", cidr.as_str())
                    .with("availabilityZoneIndex", i as u32)
                    .with("mapPublicIpOnLaunch", true),
            )?;
            public_subnets.push(subnet);
        }
        let subnet_ids: Vec<Value> = public_subnets.iter().map(ResourceHandle::id).collect();

        node.define_resource(
            "S3Endpoint",
            "ec2.gateway_endpoint",
            Properties::new()
                .with("vpcId", vpc.id())
                .with("service", "s3"),
        )?;
        node.define_resource(
            "SecretsManagerEndpoint",
            "ec2.interface_endpoint",
            Properties::new()
                .with("vpcId", vpc.id())
                .with("service", "secretsmanager")
                .with("subnetIds", vec![public_subnets[0].id()])
                .with("privateDnsEnabled", true),
        )?;

        let subnet_group_name = format!("{}-subnet-group-all", id.to_lowercase());
        let subnet_group = node.define_resource(
            "SubnetGroupAll",
            "rds.subnet_group",
            Properties::new()
                .with("name", subnet_group_name)
                .with("description", "Subnet Group with all subnets")
                .with("subnetIds", subnet_ids.clone()),
        )?;

        let load_balancer = node.define_resource(
            "ApplicationLoadBalancer",
            "elbv2.load_balancer",
            Properties::new()
                .with("type", "application")
                .with("scheme", "internet-facing")
                .with("vpcId", vpc.id())
                .with("subnetIds", subnet_ids),
        )?;

        let mut certificates = BTreeMap::new();
        for zone in &props.hosted_zones {
            let certificate = node.define_resource(
                &format!("{}Certificate", zone.name),
                "acm.certificate",
                Properties::new()
                    .with("domainName", zone.name.as_str())
                    .with("subjectAlternativeNames", vec![format!("*.{}", zone.name)])
                    .with("validationMethod", "DNS")
                    .with("hostedZoneId", zone.id.as_str()),
            )?;
            alias_record(node, &format!("{}Route53AlbRecord", zone.name), zone, None, &load_balancer)?;
            alias_record(
                node,
                &format!("{}Route53AlbRecordSubDomain", zone.name),
                zone,
                Some("*"),
                &load_balancer,
            )?;
            certificates.insert(zone.name.clone(), certificate);
        }

        node.define_resource(
            "Listener80",
            "elbv2.listener",
            Properties::new()
                .with("loadBalancerArn", load_balancer.arn())
                .with("port", 80u32)
                .with("protocol", "HTTP")
                .with("open", true)
                .with(
                    "defaultAction",
                    json!({"type": "redirect", "port": "443", "protocol": "HTTPS", "permanent": true}),
                ),
        )?;

        let https_listener = node.define_resource(
            "Listener443",
            "elbv2.listener",
            Properties::new()
                .with("loadBalancerArn", load_balancer.arn())
                .with("port", 443u32)
                .with("protocol", "HTTPS")
                .with("open", true)
                .with("certificateArns", vec![certificates[&first_zone.name].arn()])
                .with("defaultAction", json!({"type": "fixed-response", "statusCode": 404})),
        )?;

        node.export("vpcId", vpc.id());
        node.export("subnetGroupName", subnet_group.output("name"));
        node.export("loadBalancerArn", load_balancer.arn());

        Ok(Self {
            vpc,
            public_subnets,
            subnet_group,
            load_balancer,
            certificates,
            https_listener,
        })
    }
}

fn alias_record(
    node: &mut Construct,
    name: &str,
    zone: &HostedZone,
    record_name: Option<&str>,
    load_balancer: &ResourceHandle,
) -> StackResult<ResourceHandle> {
    let fqdn = match record_name {
        Some(prefix) => format!("{}.{}", prefix, zone.name),
        None => zone.name.clone(),
    };
    Ok(node.define_resource(
        name,
        "route53.a_record",
        Properties::new()
            .with("hostedZoneId", zone.id.as_str())
            .with("recordName", fqdn)
            .with("aliasTarget", load_balancer.arn()),
    )?)
}

/// Carve one /24 per availability zone out of the VPC block.
pub fn public_subnet_cidrs(cidr: &str) -> StackResult<Vec<String>> {
    let invalid = |reason: &str| StackError::InvalidVar {
        key: "cidr".to_string(),
        reason: format!("'{}': {}", cidr, reason),
    };
    let (addr, prefix) = cidr.split_once('/').ok_or_else(|| invalid("missing prefix length"))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("not an IPv4 address"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
    if prefix > SUBNET_MASK || (1u32 << (SUBNET_MASK - prefix)) < MAX_AZS {
        return Err(invalid("block too small for one /24 per availability zone"));
    }

    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    let base = u32::from(addr) & mask;
    Ok((0..MAX_AZS)
        .map(|i| format!("{}/{}", Ipv4Addr::from(base + (i << 8)), SUBNET_MASK))
        .collect())
}
