//! matte CLI
//!
//! Carrier tooling and a command-line front end for the tunnel.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use matte_client::{ClientConfig, OuterReply, TunnelClient};
use matte_crypto::CarrierKey;
use matte_protocol::{Method, RequestDescriptor, parse_request, parse_response};
use matte_stego::{CarrierFormat, Codec, SizeHint};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "matte")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log to stderr at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Embed a payload in a fresh carrier image
    Pack {
        #[arg(long, env = "MATTE_SECRET")]
        secret: String,
        #[arg(long, default_value = "png")]
        format: CarrierFormat,
        /// Exact carrier size, e.g. 256x256
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        out: PathBuf,
        /// Skip request-descriptor validation of the payload
        #[arg(long)]
        raw: bool,
        /// Payload, normally a request line such as "GET https://example.com/"
        payload: String,
    },
    /// Extract and print the payload of a carrier image
    Unpack {
        #[arg(long, env = "MATTE_SECRET")]
        secret: String,
        file: PathBuf,
    },
    /// Send one request through the tunnel
    Fetch {
        #[arg(long)]
        gateway: String,
        /// Covert API key
        #[arg(long, env = "MATTE_API_KEY")]
        key: String,
        #[arg(long, env = "MATTE_SECRET")]
        secret: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: Method,
        /// Request header, "Name: value"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
        url: String,
    },
    /// Compare the outer fingerprint of a legitimate and a covert request
    Compare {
        #[arg(long)]
        gateway: String,
        /// Legitimate API key
        #[arg(long)]
        key: String,
        #[arg(long)]
        covert_key: String,
        #[arg(long, env = "MATTE_SECRET")]
        secret: String,
        /// Photo uploaded on the legitimate path
        #[arg(long)]
        photo: PathBuf,
        /// Target fetched on the covert path
        #[arg(long, default_value = "https://httpbin.org/ip")]
        url: String,
    },
}

#[derive(Tabled)]
struct PropertyRow {
    property: &'static str,
    legitimate: String,
    covert: String,
    #[tabled(rename = "match")]
    matches: &'static str,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    match args.command {
        Commands::Pack {
            secret,
            format,
            size,
            out,
            raw,
            payload,
        } => {
            if !raw {
                parse_request(payload.as_bytes()).context("payload is not a request descriptor")?;
            }
            let hint = match size {
                Some(size) => parse_size(&size)?,
                None => SizeHint::Auto,
            };
            let carrier = codec(&secret, format)?.encode(payload.as_bytes(), hint)?;
            tokio::fs::write(&out, &carrier.bytes).await?;
            println!(
                "Wrote {}x{} {} carrier ({} bytes) to {}",
                carrier.width,
                carrier.height,
                carrier.format,
                carrier.bytes.len(),
                out.display()
            );
        }
        Commands::Unpack { secret, file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let payload = codec(&secret, CarrierFormat::default())?.decode(&bytes)?;

            if let Ok((status, body)) = parse_response(&payload) {
                println!("{}", status);
                println!("{}", String::from_utf8_lossy(&body));
            } else if let Ok(request) = parse_request(&payload) {
                println!("{} {}", request.method, request.url);
                for (name, value) in &request.headers {
                    println!("{}: {}", name, value);
                }
                if let Some(body) = &request.body {
                    println!("\n{}", String::from_utf8_lossy(body));
                }
            } else {
                println!("{}", String::from_utf8_lossy(&payload));
            }
        }
        Commands::Fetch {
            gateway,
            key,
            secret,
            method,
            headers,
            data,
            url,
        } => {
            let mut request = RequestDescriptor::new(method, url)?;
            for header in headers {
                let Some((name, value)) = header.split_once(':') else {
                    bail!("header must be \"Name: value\": {header}");
                };
                request = request.with_header(name.trim(), value.trim())?;
            }
            if let Some(data) = data {
                request = request.with_body(data.into_bytes());
            }

            let client = TunnelClient::new(ClientConfig::new(gateway, key).with_secret(secret))?;
            let response = client.fetch(&request).await?;
            println!("{}", response.status);
            println!("{}", String::from_utf8_lossy(&response.body));
        }
        Commands::Compare {
            gateway,
            key,
            covert_key,
            secret,
            photo,
            url,
        } => {
            let image = tokio::fs::read(&photo)
                .await
                .with_context(|| format!("reading {}", photo.display()))?;

            let legit = TunnelClient::new(ClientConfig::new(gateway.clone(), key))?;
            let covert =
                TunnelClient::new(ClientConfig::new(gateway, covert_key).with_secret(secret))?;

            let legit_reply = legit
                .remove_background(image, matte_client::CARRIER_FILENAME)
                .await?;
            let (descriptor, covert_reply) =
                covert.fetch_traced(&RequestDescriptor::get(url)?).await?;

            let rows = fingerprint_rows(&legit_reply, &covert_reply);
            let all_match = rows.iter().all(|r| r.matches == "yes");
            println!("{}", Table::new(rows));
            println!("Tunnelled reply: {}", descriptor.status);
            if !all_match {
                bail!("fingerprints differ");
            }
        }
    }

    Ok(())
}

fn codec(secret: &str, format: CarrierFormat) -> Result<Codec> {
    Ok(Codec::new(CarrierKey::from_secret(secret.as_bytes())?, format))
}

fn parse_size(size: &str) -> Result<SizeHint> {
    let (w, h) = size
        .split_once(['x', 'X'])
        .context("size must look like WIDTHxHEIGHT")?;
    Ok(SizeHint::Exact {
        width: w.trim().parse().context("bad width")?,
        height: h.trim().parse().context("bad height")?,
    })
}

/// The five outer properties that must agree between the two paths
fn fingerprint_rows(legit: &OuterReply, covert: &OuterReply) -> Vec<PropertyRow> {
    let presence = |reply: &OuterReply, name: &str| {
        let state = if reply.header(name).is_some() { "present" } else { "absent" };
        state.to_string()
    };
    let value = |reply: &OuterReply, name: &str| reply.header(name).unwrap_or("-").to_string();

    let pairs = [
        ("status", legit.status.as_u16().to_string(), covert.status.as_u16().to_string()),
        ("content-type", value(legit, "content-type"), value(covert, "content-type")),
        (
            "content-disposition",
            presence(legit, "content-disposition"),
            presence(covert, "content-disposition"),
        ),
        (
            "transfer-encoding",
            presence(legit, "transfer-encoding"),
            presence(covert, "transfer-encoding"),
        ),
        ("server", value(legit, "server"), value(covert, "server")),
    ];

    pairs
        .into_iter()
        .map(|(property, legitimate, covert)| PropertyRow {
            property,
            matches: if legitimate == covert { "yes" } else { "NO" },
            legitimate,
            covert,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn reply(headers: &[(&'static str, &'static str)]) -> OuterReply {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_static(value));
        }
        OuterReply {
            status: StatusCode::OK,
            headers: map,
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_parse_size() {
        assert!(matches!(
            parse_size("256x128").unwrap(),
            SizeHint::Exact {
                width: 256,
                height: 128
            }
        ));
        assert!(parse_size("256").is_err());
        assert!(parse_size("ax1").is_err());
    }

    #[test]
    fn test_fingerprint_rows() {
        let a = reply(&[("content-type", "image/png"), ("server", "uvicorn")]);
        let b = reply(&[
            ("content-type", "image/png"),
            ("server", "uvicorn"),
            ("transfer-encoding", "chunked"),
        ]);

        let rows = fingerprint_rows(&a, &b);
        assert_eq!(rows.len(), 5);
        let mismatched: Vec<_> = rows
            .iter()
            .filter(|r| r.matches != "yes")
            .map(|r| r.property)
            .collect();
        assert_eq!(mismatched, vec!["transfer-encoding"]);
    }
}
