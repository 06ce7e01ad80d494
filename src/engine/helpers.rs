//! Small rendering helpers shared by the core rules and the sandbox.

use super::options::Paths;
use crate::common::escape_attr;

/// Renders an avatar `<img>` from a `{size}` template.
///
/// The template is filled in at twice the display size for high-density screens.
pub fn avatar_img(template: &str, size: u32, paths: &Paths) -> String {
    let url = template.replace("{size}", &(size * 2).to_string());
    let src = paths.get_url_with_cdn(&url);

    format!(
        "<img loading=\"lazy\" alt=\"\" width=\"{size}\" height=\"{size}\" src=\"{}\" class=\"avatar\">",
        escape_attr(&src)
    )
}

/// Display form of a username.
pub fn format_username(username: &str) -> String {
    username.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SiteSettings;

    #[test]
    fn avatar() {
        let mut settings = SiteSettings::default();
        settings.cdn_url = Some("https://cdn.example.com".into());
        let paths = Paths::from_settings(&settings);

        assert_eq!(
            avatar_img("/user_avatar/alice/{size}/1.png", 20, &paths),
            "<img loading=\"lazy\" alt=\"\" width=\"20\" height=\"20\" src=\"https://cdn.example.com/user_avatar/alice/40/1.png\" class=\"avatar\">"
        );
    }
}
