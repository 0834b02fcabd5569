use clap::{Parser, Subcommand};
use fskv::{CompressionId, Engine, EngineConfig, EncryptionId, HashId};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kvcli", version = "0.1.0", about = "Inspect and drive an fskv database file from the command line")]
struct Cli {
    /// Path to the .fskv database file (created if missing)
    #[arg(short, long)]
    file: PathBuf,

    /// Password, if the file is (or should be) encrypted
    #[arg(short, long)]
    password: Option<String>,

    /// Encryption codec to use when creating a new file: none, aes-gcm, chacha20
    #[arg(long, default_value = "none")]
    encryption: String,

    /// Compression codec to use when creating a new file
    #[arg(long, default_value = "none")]
    compression: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value under a key
    Set {
        key: String,
        value: String,
    },
    /// Read back a value by key
    Get {
        key: String,
    },
    /// Remove a key
    Del {
        key: String,
    },
    /// List every live key
    Keys,
    /// Print file statistics
    Stat,
    /// Force an index flush
    Flush,
    /// Rewrite the file, reclaiming space from deleted/stale entries
    Compact {
        /// Reclaim every byte of slack, including the index growth pad
        #[arg(long)]
        all: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = EngineConfig {
        compression_id: parse_compression(&cli.compression),
        encryption_id: parse_encryption(&cli.encryption),
        hash_id: HashId::Xxh3,
        encryption_key: cli.password.clone(),
        ..EngineConfig::default()
    };
    config.validate()?;

    let engine = Engine::open(&cli.file, config)?;

    match cli.command {
        Commands::Set { key, value } => {
            engine.set(key.as_bytes(), value.as_bytes())?;
            engine.flush()?;
            println!("OK");
        }
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(not found)"),
        },
        Commands::Del { key } => {
            let existed = engine.delete(key.as_bytes())?;
            engine.flush()?;
            println!("{}", if existed { "deleted" } else { "(not found)" });
        }
        Commands::Keys => {
            for key in engine.keys() {
                println!("{}", hex_or_utf8(&key));
            }
        }
        Commands::Stat => {
            let stats = engine.stats();
            println!("file            {}", cli.file.display());
            println!("entries         {}", stats.count);
            println!("file_length     {} B", stats.file_length);
            println!("index_used      {} B", stats.index_used);
            println!("index_space     {} B", stats.index_space);
            println!("compression     {:?}", stats.compression_id);
            println!("encryption      {:?}", stats.encryption_id);
            println!("hash            {:?}", stats.hash_id);
            println!("dirty           {}", stats.dirty);
        }
        Commands::Flush => {
            engine.flush()?;
            println!("flushed");
        }
        Commands::Compact { all } => {
            let before = engine.stats().file_length;
            engine.compact(all)?;
            let after = engine.stats().file_length;
            println!("compacted: {before} B -> {after} B");
        }
    }

    engine.close()?;
    Ok(())
}

fn hex_or_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => s.to_string(),
        _ => format!("0x{}", hex::encode(bytes)),
    }
}

fn parse_compression(s: &str) -> CompressionId {
    match s {
        "none" => CompressionId::None,
        "gzip" => CompressionId::Gzip,
        "deflate" => CompressionId::Deflate,
        "brotli" => CompressionId::Brotli,
        "lz4" => CompressionId::Lz4,
        "zstd" => CompressionId::Zstd,
        "snappy" => CompressionId::Snappy,
        "lzma" => CompressionId::Lzma,
        other => {
            eprintln!("unknown compression '{other}', defaulting to none");
            CompressionId::None
        }
    }
}

fn parse_encryption(s: &str) -> EncryptionId {
    match s {
        "none" => EncryptionId::None,
        "aes-gcm" => EncryptionId::Aes256Gcm,
        "chacha20" => EncryptionId::ChaCha20Poly1305,
        other => {
            eprintln!("unknown encryption '{other}', defaulting to none");
            EncryptionId::None
        }
    }
}
