use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use zbus::{proxy, Connection};

#[proxy(
    interface = "org.mien.Mien1",
    default_service = "org.mien.Mien1",
    default_path = "/org/mien/Mien1"
)]
trait Mien {
    fn health(&self) -> zbus::Result<String>;
    fn detect(&self, image: Vec<u8>) -> zbus::Result<String>;
    fn recognize(&self, image: Vec<u8>, top_k: u32) -> zbus::Result<String>;
    fn emotion(&self, image: Vec<u8>) -> zbus::Result<String>;
    fn pipeline(&self, image: Vec<u8>, recognize: bool, emotions: bool, top_k: u32) -> zbus::Result<String>;
    fn enroll(&self, name: String, images: Vec<Vec<u8>>, notes: String) -> zbus::Result<String>;
    fn list_persons(&self, limit: u32, offset: u32) -> zbus::Result<String>;
    fn delete_person(&self, id: i64) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "mien", about = "Mien face recognition CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon health
    Health,
    /// Detect faces in an image
    Detect { image: PathBuf },
    /// Identify faces in an image
    Recognize {
        image: PathBuf,
        /// Candidates per face (0 = daemon default)
        #[arg(short = 'k', long, default_value_t = 0)]
        top_k: u32,
    },
    /// Classify facial emotion in an image
    Emotion { image: PathBuf },
    /// Run the full pipeline and print per-stage timings
    Pipeline {
        image: PathBuf,
        /// Skip identity recognition
        #[arg(long)]
        no_recognize: bool,
        /// Skip emotion classification
        #[arg(long)]
        no_emotions: bool,
        #[arg(short = 'k', long, default_value_t = 0)]
        top_k: u32,
    },
    /// Enroll a person from one or more images
    Enroll {
        /// Unique name for this person
        #[arg(short, long)]
        name: String,
        /// Free-text notes
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List enrolled persons
    List {
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Delete an enrolled person and all their embeddings
    Delete {
        /// Person ID to delete
        id: i64,
    },
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        Connection::system().await
    } else {
        Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = MienProxy::new(&conn).await.context("miend is not reachable")?;
    tracing::debug!(system = cli.system, "connected to miend");

    let response = match cli.command {
        Commands::Health => proxy.health().await?,
        Commands::Detect { image } => proxy.detect(read_image(&image)?).await?,
        Commands::Recognize { image, top_k } => proxy.recognize(read_image(&image)?, top_k).await?,
        Commands::Emotion { image } => proxy.emotion(read_image(&image)?).await?,
        Commands::Pipeline {
            image,
            no_recognize,
            no_emotions,
            top_k,
        } => {
            proxy
                .pipeline(read_image(&image)?, !no_recognize, !no_emotions, top_k)
                .await?
        }
        Commands::Enroll { name, notes, images } => {
            let images = images.iter().map(|p| read_image(p)).collect::<Result<Vec<_>>>()?;
            proxy.enroll(name, images, notes).await?
        }
        Commands::List { limit, offset } => proxy.list_persons(limit, offset).await?,
        Commands::Delete { id } => proxy.delete_person(id).await?,
    };

    print_json(&response)
}
