//! Prometheus text exposition format.
//!
//! Renders autoscaling snapshots for scraping by a Prometheus server or
//! compatible agent. Instances whose utilization or target could not be
//! computed are left out of those two gauges rather than reported as zero.

use std::fmt::Write;

use shoal_core::ServiceAutoscalingInfo;

/// Render autoscaling snapshots into Prometheus text format.
///
/// Produces GAUGE metrics labelled with `service` and `instance`.
pub fn render_prometheus(infos: &[ServiceAutoscalingInfo]) -> String {
    let mut out = String::new();

    gauge(
        &mut out,
        "shoal_autoscaling_current_instances",
        "Instance count currently in effect.",
        infos,
        |i| Some(i.current_instances.to_string()),
    );
    gauge(
        &mut out,
        "shoal_autoscaling_min_instances",
        "Configured minimum instance count.",
        infos,
        |i| Some(i.min_instances.to_string()),
    );
    gauge(
        &mut out,
        "shoal_autoscaling_max_instances",
        "Configured maximum instance count.",
        infos,
        |i| Some(i.max_instances.to_string()),
    );
    gauge(
        &mut out,
        "shoal_autoscaling_utilization",
        "Most recent utilization reading (0.0-1.0, may exceed 1.0).",
        infos,
        |i| i.current_utilization.map(|u| format!("{u:.4}")),
    );
    gauge(
        &mut out,
        "shoal_autoscaling_target_instances",
        "Instance count the decision policy would apply.",
        infos,
        |i| i.target_instances.map(|t| t.to_string()),
    );

    out
}

fn gauge(
    out: &mut String,
    name: &str,
    help: &str,
    infos: &[ServiceAutoscalingInfo],
    value: impl Fn(&ServiceAutoscalingInfo) -> Option<String>,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    for info in infos {
        if let Some(v) = value(info) {
            let _ = writeln!(
                out,
                "{name}{{service=\"{}\",instance=\"{}\"}} {v}",
                escape_label(&info.service),
                escape_label(&info.instance)
            );
        }
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info(service: &str) -> ServiceAutoscalingInfo {
        ServiceAutoscalingInfo {
            service: service.to_string(),
            instance: "main".to_string(),
            current_instances: 4,
            min_instances: 2,
            max_instances: 10,
            current_utilization: Some(0.8125),
            target_instances: Some(5),
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[]);
        // Should still have type declarations.
        assert!(output.contains("# HELP shoal_autoscaling_current_instances"));
        assert!(output.contains("# TYPE shoal_autoscaling_utilization gauge"));
    }

    #[test]
    fn render_single_instance() {
        let output = render_prometheus(&[test_info("web")]);

        assert!(output.contains("shoal_autoscaling_current_instances{service=\"web\",instance=\"main\"} 4"));
        assert!(output.contains("shoal_autoscaling_min_instances{service=\"web\",instance=\"main\"} 2"));
        assert!(output.contains("shoal_autoscaling_max_instances{service=\"web\",instance=\"main\"} 10"));
        assert!(output.contains("shoal_autoscaling_utilization{service=\"web\",instance=\"main\"} 0.8125"));
        assert!(output.contains("shoal_autoscaling_target_instances{service=\"web\",instance=\"main\"} 5"));
    }

    #[test]
    fn unavailable_values_are_omitted() {
        let mut info = test_info("web");
        info.current_utilization = None;
        info.target_instances = None;
        let output = render_prometheus(&[info]);

        assert!(output.contains("shoal_autoscaling_current_instances{service=\"web\""));
        assert!(!output.contains("shoal_autoscaling_utilization{"));
        assert!(!output.contains("shoal_autoscaling_target_instances{"));
    }

    #[test]
    fn labels_are_escaped() {
        let output = render_prometheus(&[test_info("we\"b")]);
        assert!(output.contains("service=\"we\\\"b\""));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&[test_info("web"), test_info("api")]);

        // Every non-empty, non-comment line should match: metric_name{labels} value
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            assert!(
                line.contains('{') && line.contains('}'),
                "line should have labels: {line}"
            );
        }
    }
}
