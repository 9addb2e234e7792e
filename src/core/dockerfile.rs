//! Renders a recipe as the equivalent container build file.

use crate::config::recipe::{PackageManager, Recipe};
use std::fmt::Write;

pub fn render(recipe: &Recipe) -> String {
    let mut out = String::new();
    // String 的 fmt::Write 不會失敗
    let _ = write_dockerfile(&mut out, recipe);
    out
}

fn write_dockerfile(out: &mut String, recipe: &Recipe) -> std::fmt::Result {
    let system = &recipe.system;
    let image_env = recipe.image_env();

    writeln!(out, "FROM {}", recipe.base.image)?;
    writeln!(out)?;

    let apt = system.package_manager == PackageManager::Apt;
    if apt && system.noninteractive {
        writeln!(out, "ENV DEBIAN_FRONTEND=noninteractive")?;
    }

    let packages = recipe.system_packages();
    if !packages.is_empty() {
        match system.package_manager {
            PackageManager::Apt => {
                write!(
                    out,
                    "RUN apt-get update && apt-get install -y --no-install-recommends {}",
                    packages.join(" ")
                )?;
                if system.clean_cache {
                    write!(out, " && rm -rf /var/lib/apt/lists/*")?;
                }
                writeln!(out)?;
            }
            PackageManager::Apk => {
                writeln!(out, "RUN apk add --no-cache {}", packages.join(" "))?;
            }
            PackageManager::None => {}
        }
    }
    writeln!(out)?;

    writeln!(out, "WORKDIR {}", recipe.workdir.path)?;
    writeln!(out)?;

    // 先只複製 manifest 再安裝，應用程式變動時這兩層仍可重用
    let manifest = &recipe.manifest.path;
    // 巢狀路徑要保留目錄，安裝指令才找得到
    let destination = if manifest.contains('/') {
        shell_quote(manifest)
    } else {
        ".".to_string()
    };
    writeln!(out, "COPY {} {}", shell_quote(manifest), destination)?;
    let installer: Vec<String> = recipe
        .manifest
        .installer
        .iter()
        .map(|arg| shell_quote(&arg.replace("{manifest}", manifest)))
        .collect();
    writeln!(out, "RUN {}", installer.join(" "))?;
    writeln!(out)?;

    writeln!(out, "COPY . .")?;
    for dir in &recipe.stage.ensure_dirs {
        writeln!(out, "RUN mkdir -p {}", shell_quote(dir))?;
    }
    writeln!(out)?;

    for (name, value) in image_env.iter().filter(|(k, _)| k.as_str() != "DEBIAN_FRONTEND") {
        writeln!(out, "ENV {}={}", name, shell_quote(value))?;
    }
    if let Some(port) = recipe.launch.expose {
        writeln!(out, "EXPOSE {}", port)?;
    }
    writeln!(out)?;

    writeln!(out, "CMD {}", launch_command(recipe))
}

/// Shell-form command so the port variable is expanded at container start.
pub fn launch_command(recipe: &Recipe) -> String {
    let launch = &recipe.launch;
    let port = match launch.fallback_port {
        Some(fallback) => format!("${{{}:-{}}}", launch.port_env, fallback),
        None => format!("${{{}}}", launch.port_env),
    };

    let mut parts = vec![shell_quote(&launch.server), shell_quote(&launch.app)];
    if let Some(dir) = &launch.app_dir {
        parts.push("--app-dir".to_string());
        parts.push(shell_quote(dir));
    }
    parts.push("--host".to_string());
    parts.push(shell_quote(&launch.host));
    parts.push("--port".to_string());
    parts.push(port);
    parts.extend(launch.extra_args.iter().map(|a| shell_quote(a)));
    parts.join(" ")
}

fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::variants::Variant;

    #[test]
    fn test_manifest_is_installed_before_tree_copy() {
        let rendered = render(&Variant::Fallback.recipe());
        let manifest_copy = rendered.find("COPY requirements.txt .").unwrap();
        let install = rendered.find("RUN pip install --no-cache-dir -r requirements.txt").unwrap();
        let tree_copy = rendered.find("COPY . .").unwrap();
        assert!(manifest_copy < install);
        assert!(install < tree_copy);
    }

    #[test]
    fn test_nested_manifest_keeps_its_directory() {
        let mut recipe = Variant::Fallback.recipe();
        recipe.manifest.path = "deps/requirements.txt".to_string();
        let rendered = render(&recipe);

        assert!(rendered.contains("COPY deps/requirements.txt deps/requirements.txt\n"));
        assert!(rendered.contains("RUN pip install --no-cache-dir -r deps/requirements.txt\n"));
        assert!(!rendered.contains("COPY deps/requirements.txt .\n"));
    }

    #[test]
    fn test_render_variant() {
        let rendered = render(&Variant::Render.recipe());
        assert!(rendered.starts_with("FROM python:3.11-slim\n"));
        assert!(rendered.contains("ENV DEBIAN_FRONTEND=noninteractive\n"));
        assert!(rendered.contains(
            "RUN apt-get update && apt-get install -y --no-install-recommends ffmpeg ca-certificates && rm -rf /var/lib/apt/lists/*\n"
        ));
        assert!(rendered.contains("ENV PORT=10000\n"));
        assert!(rendered.contains("ENV PYTHONUNBUFFERED=1\n"));
        assert!(rendered.contains("EXPOSE 10000\n"));
        assert!(rendered.ends_with("CMD uvicorn app:app --host 0.0.0.0 --port ${PORT}\n"));
    }

    #[test]
    fn test_port_expansion_per_variant() {
        assert_eq!(
            launch_command(&Variant::Fallback.recipe()),
            "uvicorn main:app --host 0.0.0.0 --port ${PORT:-3000}"
        );
        assert_eq!(
            launch_command(&Variant::Strict.recipe()),
            "uvicorn main:app --app-dir backend --host 0.0.0.0 --port ${PORT}"
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("main:app"), "main:app");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
