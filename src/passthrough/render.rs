use std::fmt::Write;

use super::generator::{HttpRule, PassthroughConfig};

/// Listener layout of the generated nginx `stream` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassthroughSettings {
    pub tls_listen_port: u16,
    pub http_listen_port: u16,
    /// Loopback port of the server that closes unmatched TLS connections.
    pub reject_port: u16,
}

impl Default for PassthroughSettings {
    fn default() -> Self {
        Self {
            tls_listen_port: 443,
            http_listen_port: 80,
            reject_port: 9443,
        }
    }
}

/// Renders the config as an nginx `stream` document. TLS is never terminated.
pub fn render_nginx(config: &PassthroughConfig, settings: &PassthroughSettings) -> String {
    let mut out = String::new();
    let reject = format!("127.0.0.1:{}", settings.reject_port);

    // `write!` into a String cannot fail.
    let _ = writeln!(out, "# Managed by nodenexus-rotator for vps {}. Do not edit.", config.vps_id);
    let _ = writeln!(out, "stream {{");

    let _ = writeln!(out, "    map $ssl_preread_server_name $passthrough_tls_upstream {{");
    let _ = writeln!(out, "        hostnames;");
    for route in &config.routes {
        let _ = writeln!(out, "        {} {};", route.hostname, route.upstream);
    }
    let _ = writeln!(out, "        default {reject};");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out);

    let _ = writeln!(out, "    server {{");
    let _ = writeln!(out, "        listen {};", settings.tls_listen_port);
    let _ = writeln!(out, "        ssl_preread on;");
    let _ = writeln!(out, "        proxy_pass $passthrough_tls_upstream;");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out);

    let _ = writeln!(out, "    # Unmatched SNI: close the connection.");
    let _ = writeln!(out, "    server {{");
    let _ = writeln!(out, "        listen {reject};");
    let _ = writeln!(out, "        return \"\";");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out);

    if let HttpRule::Default { upstream, l7_required } = &config.http {
        let _ = writeln!(
            out,
            "    # HTTP targets differ; all plain HTTP goes to {upstream}."
        );
        let _ = writeln!(out, "    # These hosts need Host-header routing at that backend:");
        for host in l7_required {
            let _ = writeln!(out, "    #   {} -> {}", host.hostname, host.upstream);
        }
    }
    let _ = writeln!(out, "    server {{");
    let _ = writeln!(out, "        listen {};", settings.http_listen_port);
    let _ = writeln!(out, "        proxy_pass {};", config.http.upstream());
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    out
}
