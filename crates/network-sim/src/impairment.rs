use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::command::Exec;

/// Link shaping applied via `tc netem` (and optionally `tbf`).
///
/// All fields default to `None`/`false`. Omitted parameters are not passed
/// to `tc`. An all-`None` config clears any existing shaping on the
/// interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpairmentConfig {
    pub delay_ms: Option<u32>,
    pub jitter_ms: Option<u32>,
    pub loss_percent: Option<f32>,
    pub rate_kbit: Option<u64>,
    /// netem queue limit in packets.
    pub limit_packets: Option<u32>,
    /// When true, bandwidth is enforced via a TBF root qdisc that drops
    /// excess packets. When false, `rate_kbit` only adds serialization
    /// delay (netem `rate` param).
    pub tbf_shaping: bool,
}

impl ImpairmentConfig {
    /// True if no shaping parameter is set.
    pub fn is_empty(&self) -> bool {
        self.delay_ms.is_none()
            && self.loss_percent.is_none()
            && self.rate_kbit.is_none()
            && self.limit_packets.is_none()
    }

    fn has_netem_params(&self) -> bool {
        self.delay_ms.is_some() || self.loss_percent.is_some() || self.limit_packets.is_some()
    }

    fn netem_args(&self, include_rate: bool) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(delay) = self.delay_ms {
            args.push("delay".into());
            args.push(format!("{delay}ms"));
            if let Some(jitter) = self.jitter_ms
                && jitter > 0
            {
                args.push(format!("{jitter}ms"));
            }
        }

        if let Some(loss) = self.loss_percent {
            args.extend(["loss".into(), format!("{loss}%")]);
        }

        if let Some(limit) = self.limit_packets {
            args.extend(["limit".into(), limit.to_string()]);
        }

        if include_rate
            && let Some(rate) = self.rate_kbit
        {
            args.extend(["rate".into(), format!("{rate}kbit")]);
        }

        args
    }

    /// The `tc` invocations (arguments after `tc`) that install this config
    /// on `iface`, assuming the root qdisc was already removed.
    ///
    /// With `tbf_shaping` and a rate, TBF is the root qdisc and netem hangs
    /// off it as a child; otherwise netem is the root.
    pub fn tc_commands(&self, iface: &str) -> Result<Vec<Vec<String>>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let mut commands = Vec::new();
        let words = |s: &[&str]| s.iter().map(|w| w.to_string()).collect::<Vec<_>>();

        if self.tbf_shaping {
            let rate = self
                .rate_kbit
                .context("tbf_shaping requires rate_kbit")?;

            // burst = max(rate_bytes/10, 1540): at least one MTU
            let rate_bytes_per_sec = rate * 1000 / 8;
            let burst = rate_bytes_per_sec.max(15400) / 10;

            let mut tbf = words(&["qdisc", "add", "dev", iface, "root", "handle", "1:", "tbf"]);
            tbf.extend([
                "rate".into(),
                format!("{rate}kbit"),
                "burst".into(),
                burst.to_string(),
                "latency".into(),
                "1s".into(),
            ]);
            commands.push(tbf);

            if self.has_netem_params() {
                let mut netem = words(&[
                    "qdisc", "add", "dev", iface, "parent", "1:1", "handle", "10:", "netem",
                ]);
                netem.extend(self.netem_args(false));
                commands.push(netem);
            }
        } else {
            let mut netem = words(&["qdisc", "add", "dev", iface, "root", "netem"]);
            netem.extend(self.netem_args(true));
            commands.push(netem);
        }

        Ok(commands)
    }
}

/// Apply shaping to `iface` inside `target`.
///
/// Always removes the existing root qdisc first (clean slate).
pub fn apply_impairment(target: &dyn Exec, iface: &str, config: &ImpairmentConfig) -> Result<()> {
    let _ = target.exec("tc", &["qdisc", "del", "dev", iface, "root"]);

    for args in config.tc_commands(iface)? {
        let argv: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let output = target.exec("tc", &argv)?;
        if !output.status.success() {
            bail!(
                "tc {} in {}\n{}",
                args.join(" "),
                target.context_name(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
    }

    debug!(iface, ns = target.context_name(), ?config, "applied link shaping");
    Ok(())
}
