//! 트레이딩 엔진 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 마스터 키 생성
//! trader keygen
//!
//! # 브로커 자격증명 암호화 (TRADER_MASTER_KEY 필요)
//! trader encrypt-credentials --api-key AKIA... --api-secret-env BINANCE_API_SECRET
//!
//! # 틱 리플레이로 신호 확인
//! trader replay -c config/default.toml -i data/btc_ticks.csv
//!
//! # 모의 브로커로 페이퍼 트레이딩
//! trader paper -c config/default.toml -i data/btc_ticks.csv --balance 10000
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::io::BufWriter;
use std::str::FromStr;
use tracing::info;
use trader_core::{init_logging, AppConfig, LogConfig};

use trader_cli::commands::credentials::{encrypt_credentials, keygen, master_key_from_env};
use trader_cli::commands::paper::{run_paper, PaperOptions};
use trader_cli::commands::replay::{replay_ticks, write_signals};
use trader_cli::commands::ticks::load_ticks;

#[derive(Parser)]
#[command(name = "trader")]
#[command(about = "Trading engine CLI - 다중 사용자 신호 기반 자동 매매", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 새 마스터 키 생성 (base64)
    Keygen,

    /// 브로커 자격증명을 계좌 저장용 암호문으로 변환
    EncryptCredentials {
        /// API 키
        #[arg(long)]
        api_key: String,

        /// API 시크릿을 담은 환경 변수 이름
        #[arg(long, default_value = "BROKER_API_SECRET")]
        api_secret_env: String,
    },

    /// CSV 틱을 재생해 지표 스냅샷과 신호 생성 (주문 없음)
    Replay {
        /// 설정 파일
        #[arg(short, long, default_value = "config/default.toml")]
        config: String,

        /// 틱 CSV 파일
        #[arg(short, long)]
        input: String,

        /// 신호 출력 파일 (JSON Lines)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// CSV 틱으로 모의 브로커 페이퍼 트레이딩
    Paper {
        /// 설정 파일
        #[arg(short, long, default_value = "config/default.toml")]
        config: String,

        /// 틱 CSV 파일
        #[arg(short, long)]
        input: String,

        /// 초기 잔고
        #[arg(long, default_value = "10000")]
        balance: String,

        /// 자동 매매 끄기 (신호는 수동 확인 대기)
        #[arg(long)]
        manual: bool,
    },
}

fn load_config(path: &str) -> Result<AppConfig> {
    let config = AppConfig::load(path).with_context(|| format!("설정 로드 실패: {}", path))?;
    init_logging(LogConfig::from(&config.logging))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            println!("{}", keygen());
        }

        Commands::EncryptCredentials {
            api_key,
            api_secret_env,
        } => {
            let master_key = master_key_from_env()?;
            let api_secret = std::env::var(&api_secret_env)
                .map_err(|_| anyhow!("{} 환경 변수가 설정되지 않았습니다", api_secret_env))?;
            println!("{}", encrypt_credentials(&api_key, &api_secret, &master_key)?);
        }

        Commands::Replay {
            config,
            input,
            output,
        } => {
            let config = load_config(&config)?;
            let ticks = load_ticks(&input)?;
            let report = replay_ticks(&config, &ticks);

            match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("출력 파일 생성 실패: {}", path))?;
                    write_signals(&report.signals, BufWriter::new(file))?;
                    info!(path = %path, "신호 저장");
                }
                None => write_signals(&report.signals, std::io::stdout().lock())?,
            }
            println!(
                "틱 {}개, 스냅샷 {}개, 신호 {}개 (신호 없음 {}개)",
                report.ticks,
                report.snapshots.len(),
                report.signals.len(),
                report.no_trade
            );
        }

        Commands::Paper {
            config,
            input,
            balance,
            manual,
        } => {
            let config = load_config(&config)?;
            let ticks = load_ticks(&input)?;
            let initial_balance = Decimal::from_str(&balance)
                .with_context(|| format!("잘못된 잔고: {}", balance))?;
            let options = PaperOptions {
                initial_balance,
                auto_trading: !manual,
                ..Default::default()
            };

            let report = run_paper(&config, &ticks, &options).await?;
            println!(
                "틱 {}개, 스냅샷 {}개, 신호 {}개: 체결 {}, 차단 {}, 거부 {}, 수동 대기 {}",
                report.ticks,
                report.snapshots,
                report.signals,
                report.filled,
                report.blocked,
                report.rejected,
                report.manual
            );
            for position in &report.positions {
                println!(
                    "  {} 수량 {} 진입가 {}",
                    position.instrument, position.net_size, position.entry_price
                );
            }
            if let Some(equity) = report.equity {
                println!("평가액: {}", equity);
            }
        }
    }

    Ok(())
}
