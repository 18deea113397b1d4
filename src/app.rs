use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use crossterm::tty::IsTty;
use tracing::{debug, warn};

use crate::auth;
use crate::config::{self, Config};
use crate::data::{
    BucketUrls, CategoryService, ImageService, SupabaseCategoryService, SupabaseImageService,
    UrlResolver,
};
use crate::feed::{Feed, FeedOutcome, Fetcher, LoadingFlag};
use crate::logging;
use crate::notify::{Notification, Notifier};
use crate::query::FilterState;
use crate::render::{self, DetailExtras, RenderOptions};
use crate::session::Gate;
use crate::storage;
use crate::supabase;
use crate::ui;

pub const PASSWORD_ENV: &str = "PICSHARE_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
    #[default]
    Feed,
    Categories,
    Image {
        id: String,
        open: bool,
    },
    Download {
        id: String,
        out: Option<PathBuf>,
    },
    Mine,
    SignIn {
        email: String,
    },
    SignOut,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub command: Command,
    pub filters: FilterState,
    pub pages: u32,
    pub verbose: bool,
    pub config_file: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            command: Command::Feed,
            filters: FilterState::default(),
            pages: 1,
            verbose: false,
            config_file: None,
        }
    }
}

pub fn run(opts: RunOptions) -> Result<()> {
    logging::init(opts.verbose);
    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    cfg.validate().with_context(|| {
        format!(
            "invalid config (edit {})",
            friendly_path(config::default_path().as_ref())
        )
    })?;

    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.session.state_path.clone(),
        })
        .context("open storage")?,
    );

    let style = ui::Style {
        width: cfg.display.width,
        color: io::stdout().is_tty() && std::env::var_os("NO_COLOR").is_none(),
    };
    let app = App::new(cfg, store)?;
    app.restore_session();

    let password = match &opts.command {
        Command::SignIn { .. } => Some(read_password()?),
        _ => None,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = app.execute(&opts, password.as_deref(), style, &mut out);
    app.flush_notifications(style);
    result
}

/// Wires the remote client, the session and the services for one run.
pub struct App {
    cfg: Config,
    client: Arc<supabase::Client>,
    images: Arc<dyn ImageService>,
    categories: Arc<dyn CategoryService>,
    urls: BucketUrls,
    gate: Arc<Gate>,
    flow: auth::Flow,
    render_options: RenderOptions,
    notifier: parking_lot::Mutex<Notifier>,
}

impl App {
    pub fn new(cfg: Config, store: Arc<storage::Store>) -> Result<Self> {
        let client = Arc::new(
            supabase::Client::new(supabase::ClientConfig {
                url: cfg.backend.url.clone(),
                anon_key: cfg.backend.anon_key.clone(),
                user_agent: cfg.backend.user_agent.clone(),
                timeout: Some(cfg.backend.timeout),
                http_client: None,
            })
            .context("create backend client")?,
        );
        let gate = Arc::new(Gate::new());
        let flow = auth::Flow::new(
            client.clone(),
            store,
            gate.clone(),
            auth::Config {
                refresh_skew: cfg.session.refresh_skew,
            },
        );
        Ok(Self {
            images: Arc::new(SupabaseImageService::new(client.clone())),
            categories: Arc::new(SupabaseCategoryService::new(client.clone())),
            urls: BucketUrls::new(client.clone(), &cfg.backend.storage_bucket),
            render_options: cfg.display.render_options(),
            notifier: parking_lot::Mutex::new(Notifier::new(cfg.display.notification_duration)),
            client,
            gate,
            flow,
            cfg,
        })
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// A broken stored session never blocks anonymous browsing.
    pub fn restore_session(&self) {
        match self.flow.restore() {
            Ok(Some(principal)) => debug!(user = %principal.id, "session restored"),
            Ok(None) => {}
            Err(err) => warn!(error = %format!("{err:#}"), "could not restore session"),
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifier.lock().drain()
    }

    fn notify(&self, notification: Notification) {
        self.notifier.lock().push(notification);
    }

    fn flush_notifications(&self, style: ui::Style) {
        let stderr = io::stderr();
        let mut err = stderr.lock();
        for notification in self.notifier.lock().active() {
            let _ = writeln!(err, "{}", ui::format_notification(&notification, style));
        }
    }

    pub fn execute(
        &self,
        opts: &RunOptions,
        password: Option<&str>,
        style: ui::Style,
        out: &mut dyn Write,
    ) -> Result<()> {
        match &opts.command {
            Command::Feed => self.show_feed(&opts.filters, opts.pages, style, out),
            Command::Categories => self.show_categories(style, out),
            Command::Image { id, open } => self.show_image(id, *open, style, out),
            Command::Download { id, out: dir } => {
                let dir = dir.clone().unwrap_or_else(|| PathBuf::from("."));
                let path = self.download(id, &dir)?;
                writeln!(out, "{}", path.display())?;
                Ok(())
            }
            Command::Mine => self.show_gallery(style, out),
            Command::SignIn { email } => {
                let password = password.ok_or_else(|| anyhow!("password required"))?;
                let principal = self.flow.sign_in_with_password(email, password)?;
                self.notify(Notification::success(format!(
                    "Signed in as {}",
                    principal.email
                )));
                Ok(())
            }
            Command::SignOut => {
                self.flow.sign_out()?;
                self.notify(Notification::success("Signed out"));
                Ok(())
            }
        }
    }

    fn show_feed(
        &self,
        filters: &FilterState,
        pages: u32,
        style: ui::Style,
        out: &mut dyn Write,
    ) -> Result<()> {
        let fetcher = Fetcher::new(
            self.images.clone(),
            Arc::new(LoadingFlag::default()),
            self.cfg.feed.stale_responses,
        );
        let mut feed = Feed::new(fetcher, self.cfg.feed.query_config()?);

        let first = feed.apply_filters(filters.clone());
        if let FeedOutcome::Failed { message } = first {
            bail!(message);
        }
        let mut loaded = 1;
        while loaded < pages.max(1) && feed.state().has_more() {
            let outcome = feed.load_more();
            if let Some(notification) = outcome.notification() {
                self.notify(notification);
                break;
            }
            loaded += 1;
        }

        let cards = render::render(feed.state(), &self.urls, &self.render_options);
        write!(out, "{}", ui::format_cards(&cards, style))?;
        if feed.state().has_more() {
            self.notify(Notification::info(format!(
                "More images available, rerun with --pages {}",
                loaded + 1
            )));
        }
        Ok(())
    }

    fn show_categories(&self, style: ui::Style, out: &mut dyn Write) -> Result<()> {
        let summaries = self.categories.categories_with_counts()?;
        let cards = render::render_categories(&summaries, &self.render_options);
        write!(out, "{}", ui::format_categories(&cards, style))?;
        Ok(())
    }

    fn show_image(&self, id: &str, open: bool, style: ui::Style, out: &mut dyn Write) -> Result<()> {
        if let Err(err) = self.images.record_view(id) {
            warn!(image = id, error = %format!("{err:#}"), "view not recorded");
        }
        let record = self.images.image_detail(id)?;
        let tags = self.images.image_tags(id).unwrap_or_else(|err| {
            warn!(image = id, error = %format!("{err:#}"), "tags not loaded");
            Vec::new()
        });
        let comments = self.images.comments(id).unwrap_or_else(|err| {
            warn!(image = id, error = %format!("{err:#}"), "comments not loaded");
            Vec::new()
        });
        let detail = render::render_detail(
            &record,
            DetailExtras {
                tags: &tags,
                comments: &comments,
            },
            &self.urls,
            &self.render_options,
            &self.cfg.share_base(),
        );
        write!(out, "{}", ui::format_detail(&detail, style))?;
        if open {
            match webbrowser::open(&detail.card.image_url) {
                Ok(_) => self.notify(Notification::info("Opened image in browser")),
                Err(err) => self.notify(Notification::error(format!(
                    "Failed to open browser: {err}"
                ))),
            }
        }
        Ok(())
    }

    /// Saves the image into `dir` and returns the written path.
    pub fn download(&self, id: &str, dir: &Path) -> Result<PathBuf> {
        let record = self.images.image_detail(id)?;
        let url = self.urls.public_url(&record.file_path);
        let bytes = self
            .client
            .download(&url)
            .with_context(|| format!("download {}", record.file_path))?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create directory {}", dir.display()))?;
        let path = dir.join(record.download_name());
        std::fs::write(&path, &bytes).with_context(|| format!("write {}", path.display()))?;
        if let Err(err) = self.images.record_download(id) {
            warn!(image = id, error = %format!("{err:#}"), "download not recorded");
        }
        self.notify(Notification::success(format!(
            "Downloaded {}",
            record.download_name()
        )));
        Ok(path)
    }

    fn show_gallery(&self, style: ui::Style, out: &mut dyn Write) -> Result<()> {
        let principal = self.gate.require_principal()?;
        let records = self.images.user_images(&principal.id)?;
        let gallery = render::render_gallery(&records, &self.urls, &self.render_options);
        write!(out, "{}", ui::format_gallery(&gallery, style))?;
        Ok(())
    }
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        if !password.is_empty() {
            return Ok(password);
        }
    }
    if io::stdin().is_tty() {
        eprint!("Password: ");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/picshare/config.yaml".to_string()
    }
}
