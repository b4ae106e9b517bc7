//! Command templates for tools that need a human decision before they run
//!
//! These are written to the run directory as plain text and are never
//! executed by deimos.

use crate::target::TargetDescriptor;

const HEADER: &str = "\
# ------------------------------------------------------------------
# NOT EXECUTED by deimos. Review, adapt and run manually, and only
# with written authorization covering this exact activity.
# ------------------------------------------------------------------
";

const HYDRA: &str = "\
# Credential brute force against {{TARGET}}
# Replace the user and password lists with ones agreed in scope.

hydra -L users.txt -P passwords.txt -t 4 -f -o hydra_ssh.txt ssh://{{TARGET}}
hydra -L users.txt -P passwords.txt -t 4 -f -o hydra_ftp.txt ftp://{{TARGET}}
hydra -L users.txt -P passwords.txt -f -o hydra_http.txt {{TARGET}} \\
    https-post-form \"/login:username=^USER^&password=^PASS^:F=invalid\"
";

const SQLMAP: &str = "\
# Injection testing against {{BASE_URL}}
# Point -u at a concrete parameterised URL found during recon.

sqlmap -u \"{{BASE_URL}}/?id=1\" --batch --level 2 --risk 1 --output-dir sqlmap_{{TARGET}}
sqlmap -u \"{{BASE_URL}}/\" --forms --crawl 2 --batch --output-dir sqlmap_{{TARGET}}
";

const METASPLOIT: &str = "\
# Metasploit resource script for {{TARGET}}
# Load with: msfconsole -r manual_metasploit.rc

setg RHOSTS {{TARGET}}
setg VHOST {{TARGET}}
use auxiliary/scanner/http/http_version
run
use auxiliary/scanner/ssl/ssl_version
run
# Add exploit modules here once a finding has been confirmed by hand.
";

/// A rendered, non-executable command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub name: &'static str,
    pub file_name: &'static str,
    pub body: String,
}

/// Render the three manual templates for `target`
pub fn render(target: &TargetDescriptor) -> Vec<CommandTemplate> {
    [
        ("credential brute force", "manual_hydra.txt", HYDRA),
        ("injection testing", "manual_sqlmap.txt", SQLMAP),
        ("exploitation framework", "manual_metasploit.rc", METASPLOIT),
    ]
    .into_iter()
    .map(|(name, file_name, text)| CommandTemplate {
        name,
        file_name,
        body: substitute(&format!("{}\n{}", HEADER, text), target),
    })
    .collect()
}

fn substitute(text: &str, target: &TargetDescriptor) -> String {
    text.replace("{{TARGET}}", &target.host)
        .replace("{{BASE_URL}}", &target.base_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::resolve;

    #[test]
    fn test_three_templates_with_target_substituted() {
        let target = resolve("https://shop.example.com:8443/cart").unwrap();
        let templates = render(&target);

        let files: Vec<&str> = templates.iter().map(|t| t.file_name).collect();
        assert_eq!(files, vec!["manual_hydra.txt", "manual_sqlmap.txt", "manual_metasploit.rc"]);

        for template in &templates {
            assert!(template.body.contains("NOT EXECUTED"));
            assert!(!template.body.contains("{{"));
            assert!(template.body.contains("shop.example.com"));
        }
        assert!(templates[1].body.contains("https://shop.example.com:8443/?id=1"));
        assert!(templates[2].body.contains("setg RHOSTS shop.example.com"));
    }

    #[test]
    fn test_render_is_pure() {
        let target = resolve("10.1.2.3").unwrap();
        assert_eq!(render(&target), render(&target));
    }
}
