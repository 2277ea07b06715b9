use clap::Parser;
use vidresolve::preference::QualityPreference;

#[derive(Parser, Debug)]
#[command(version)]
/// Resolve embed pages of video hosts into playable stream urls
pub(crate) struct Args {
    /// Use a specific extractor, even for urls it does not recognise
    #[arg(short, long, value_name = "NAME")]
    pub(crate) extractor: Option<String>,

    /// Referer of the page the urls were found on
    #[arg(short, long)]
    pub(crate) referer: Option<String>,

    /// User agent for every request
    #[arg(short = 'A', long)]
    pub(crate) user_agent: Option<String>,

    /// Label prefix naming the server option, e.g. "GDrive - "
    #[arg(long)]
    pub(crate) prefix: Option<String>,

    /// Put videos whose label contains this quality first, e.g. 1080
    #[arg(short, long)]
    pub(crate) quality: Option<String>,

    /// Among those, put videos whose label contains this server first
    #[arg(long)]
    pub(crate) server: Option<String>,

    /// Print one JSON object per video
    #[arg(long)]
    pub(crate) json: bool,

    /// Enable debug mode
    #[arg(short, long)]
    pub(crate) debug: bool,

    /// Embed urls
    #[arg(required = true)]
    pub(crate) urls: Vec<String>,
}

impl Args {
    pub(crate) fn get_quality_preference(&self) -> QualityPreference {
        QualityPreference::new(self.quality.clone(), self.server.clone())
    }
}
