//! Built-in resource kinds.
//!
//! Covers the networking, container, load-balancing, registry, monitoring
//! and CI resources a typical web stack is composed from.

use super::registry::{FieldType, ResourceSchema};

use FieldType::{Boolean, Integer, List, Map, Number, String as Text};

/// Returns the schemas of every built-in kind.
#[must_use]
pub fn builtin_schemas() -> Vec<ResourceSchema> {
    vec![
        ResourceSchema::new("vpc")
            .required("cidr", Text)
            .optional("max_azs", Integer)
            .optional("nat_gateways", Integer)
            .optional("subnets", List)
            .output("vpc_id", Text)
            .output("public_subnet_ids", List)
            .output("private_subnet_ids", List)
            .triggers(&["cidr"]),
        ResourceSchema::new("security_group")
            .required("vpc_id", Text)
            .required("description", Text)
            .optional("group_name", Text)
            .optional("allow_all_outbound", Boolean)
            .optional("ingress_rules", List)
            .output("security_group_id", Text)
            .triggers(&["vpc_id", "description", "group_name"]),
        ResourceSchema::new("ecs_cluster")
            .required("vpc_id", Text)
            .optional("cluster_name", Text)
            .optional("container_insights", Boolean)
            .output("cluster_arn", Text)
            .output("cluster_name", Text)
            .triggers(&["vpc_id", "cluster_name"]),
        ResourceSchema::new("ecr_repository")
            .required("repository_name", Text)
            .optional("ssm_parameter_name", Text)
            .optional("image_scan_on_push", Boolean)
            .output("repository_uri", Text)
            .output("repository_arn", Text)
            .triggers(&["repository_name"]),
        ResourceSchema::new("iam_role")
            .required("assumed_by", Text)
            .optional("role_name", Text)
            .optional("managed_policies", List)
            .output("role_arn", Text)
            .output("role_name", Text)
            .triggers(&["assumed_by", "role_name"]),
        ResourceSchema::new("fargate_service")
            .required("cluster_arn", Text)
            .required("subnet_ids", List)
            .required("security_group_id", Text)
            .required("image", Text)
            .required("container_name", Text)
            .optional("service_name", Text)
            .optional("task_role_arn", Text)
            .optional("execution_role_arn", Text)
            .optional("port_mappings", List)
            .optional("cpu", Integer)
            .optional("memory_mib", Integer)
            .optional("desired_count", Integer)
            .optional("environment", Map)
            .optional("secrets", Map)
            .optional("command", List)
            .optional("log_retention_days", Integer)
            .output("service_arn", Text)
            .output("service_name", Text)
            .output("task_definition_arn", Text)
            .triggers(&["cluster_arn", "service_name", "container_name"]),
        ResourceSchema::new("load_balancer")
            .required("vpc_id", Text)
            .required("security_group_id", Text)
            .optional("internet_facing", Boolean)
            .optional("listener_port", Integer)
            .optional("target_service_arn", Text)
            .optional("target_container_name", Text)
            .optional("target_port", Integer)
            .optional("access_logs_bucket", Text)
            .output("load_balancer_arn", Text)
            .output("dns_name", Text)
            .output("listener_arn", Text)
            .triggers(&["vpc_id", "internet_facing"]),
        ResourceSchema::new("s3_bucket")
            .optional("bucket_name", Text)
            .optional("versioned", Boolean)
            .optional("auto_delete_objects", Boolean)
            .output("bucket_name", Text)
            .output("bucket_arn", Text)
            .triggers(&["bucket_name"]),
        ResourceSchema::new("ssm_parameter")
            .required("parameter_name", Text)
            .required("string_value", Text)
            .output("parameter_arn", Text)
            .triggers(&["parameter_name"]),
        ResourceSchema::new("cloudwatch_alarm")
            .required("alarm_name", Text)
            .required("namespace", Text)
            .required("metric_name", Text)
            .required("threshold", Number)
            .required("comparison_operator", Text)
            .optional("dimensions", Map)
            .optional("period_seconds", Integer)
            .optional("statistic", Text)
            .optional("evaluation_periods", Integer)
            .optional("alarm_description", Text)
            .optional("alarm_actions", List)
            .output("alarm_arn", Text)
            .triggers(&["alarm_name"]),
        ResourceSchema::new("composite_alarm")
            .required("alarm_name", Text)
            .required("alarm_arns", List)
            .required("composite_operator", Text)
            .optional("alarm_description", Text)
            .optional("alarm_actions", List)
            .output("alarm_arn", Text)
            .triggers(&["alarm_name"]),
        ResourceSchema::new("ec2_instance")
            .required("vpc_id", Text)
            .required("security_group_id", Text)
            .required("key_name", Text)
            .optional("subnet_ids", List)
            .optional("instance_type", Text)
            .optional("machine_image", Text)
            .optional("user_data", List)
            .optional("role_arn", Text)
            .output("instance_id", Text)
            .output("private_ip", Text)
            .output("public_ip", Text)
            .triggers(&["vpc_id", "key_name", "instance_type", "machine_image", "user_data"]),
        ResourceSchema::new("lambda_function")
            .required("runtime", Text)
            .required("handler", Text)
            .required("code_location", Text)
            .optional("function_name", Text)
            .optional("role_arn", Text)
            .optional("environment", Map)
            .optional("timeout_seconds", Integer)
            .output("function_arn", Text)
            .triggers(&["function_name"]),
        ResourceSchema::new("pipeline")
            .required("source_connection_arn", Text)
            .required("repository", Text)
            .required("branch", Text)
            .required("services", List)
            .optional("environment", Map)
            .optional("artifact_bucket", Text)
            .output("pipeline_arn", Text)
            .output("pipeline_name", Text)
            .triggers(&["source_connection_arn"]),
    ]
}
