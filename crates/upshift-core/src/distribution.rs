use crate::ServerVersion;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Distribution {
    #[default]
    Payara,
    PayaraMl,
    PayaraWeb,
    PayaraWebMl,
}

impl Distribution {
    pub const ALL: [Self; 4] = [Self::Payara, Self::PayaraMl, Self::PayaraWeb, Self::PayaraWebMl];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Payara => "payara",
            Self::PayaraMl => "payara-ml",
            Self::PayaraWeb => "payara-web",
            Self::PayaraWebMl => "payara-web-ml",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "payara" => Some(Self::Payara),
            "payara-ml" => Some(Self::PayaraMl),
            "payara-web" => Some(Self::PayaraWeb),
            "payara-web-ml" => Some(Self::PayaraWebMl),
            _ => None,
        }
    }

    /// Web profile distributions ship without the message-queue bundle.
    pub fn is_web(self) -> bool {
        matches!(self, Self::PayaraWeb | Self::PayaraWebMl)
    }

    pub fn archive_file_name(self, version: &ServerVersion) -> String {
        format!("{}-{}.zip", self.as_str(), version)
    }

    /// `<repository>/<distribution>/<version>/<distribution>-<version>.zip`
    pub fn download_url(self, repository_url: &str, version: &ServerVersion) -> String {
        format!(
            "{}/{}/{}/{}",
            repository_url.trim_end_matches('/'),
            self.as_str(),
            version,
            self.archive_file_name(version)
        )
    }
}

