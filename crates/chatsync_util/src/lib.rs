#![forbid(unsafe_code)]

pub mod endpoint {
	/// Transport security of a server endpoint.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub enum Scheme {
		Http,
		Https,
	}

	impl Scheme {
		pub const fn as_str(self) -> &'static str {
			match self {
				Scheme::Http => "http",
				Scheme::Https => "https",
			}
		}

		const fn socket_scheme(self) -> &'static str {
			match self {
				Scheme::Http => "ws",
				Scheme::Https => "wss",
			}
		}
	}

	/// Parsed `http(s)://host:port` server endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct ServerEndpoint {
		pub scheme: Scheme,
		pub host: String,
		pub port: u16,
	}

	impl ServerEndpoint {
		/// Path of the realtime socket relative to the server root.
		pub const SOCKET_PATH: &'static str = "/ws";

		/// Returns `host:port` (host preserved, IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Base URL for request/response calls (e.g. `http://host:port`).
		pub fn base_url(&self) -> String {
			format!("{}://{}", self.scheme.as_str(), self.hostport())
		}

		/// URL of the realtime socket (e.g. `ws://host:port/ws`).
		pub fn socket_url(&self) -> String {
			format!("{}://{}{}", self.scheme.socket_scheme(), self.hostport(), Self::SOCKET_PATH)
		}

		/// Parse a server endpoint string in the form `http://host:port` or `https://host:port`.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected http://host:port)".to_string());
			}

			let (scheme, rest) = if let Some(rest) = s.strip_prefix("http://") {
				(Scheme::Http, rest)
			} else if let Some(rest) = s.strip_prefix("https://") {
				(Scheme::Https, rest)
			} else {
				return Err(format!("invalid endpoint (expected http://host:port or https://host:port): {s}"));
			};

			// A single trailing slash is tolerated; anything else after the authority is not.
			let rest = rest.strip_suffix('/').unwrap_or(rest);

			if rest.contains('/') || rest.contains('?') || rest.contains('#') {
				return Err(format!(
					"invalid endpoint (expected {}://host:port without path/query/fragment): {s}",
					scheme.as_str()
				));
			}

			let (host, port_str) = rest
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port, expected {}://host:port): {s}", scheme.as_str()))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected {}://host:port): {s}", scheme.as_str()));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!(
					"invalid endpoint host (IPv6 must be bracketed like http://[::1]:8080): {s}"
				));
			}

			let port: u16 = port_str
				.trim()
				.parse()
				.map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?;

			if port == 0 {
				return Err(format!("invalid endpoint port (expected 1..=65535): {s}"));
			}

			Ok(Self {
				scheme,
				host: host.to_string(),
				port,
			})
		}
	}

	/// Validate `http(s)://host:port`.
	pub fn validate_server_endpoint(s: &str) -> Result<(), String> {
		let _ = ServerEndpoint::parse(s)?;
		Ok(())
	}

}
