use crate::docker::docker_models::SandboxLanguage;
use crate::utils::helper_utils::shell_quote;

/// Builds the command run by `sh -c` inside the sandbox: write the source to a file, then
/// compile and run it. Only `code` is caller-controlled and it is always single-quoted.
pub fn generate_shell_command(language: SandboxLanguage, code: &str) -> String {
    let source = shell_quote(code);
    match language {
        SandboxLanguage::Python3 => {
            format!("printf '%s\\n' {source} > solution.py && python3 solution.py")
        }
        SandboxLanguage::Cpp => format!(
            "printf '%s\\n' {source} > solution.cpp && g++ -o result.out solution.cpp && ./result.out"
        ),
        SandboxLanguage::Java => format!(
            "printf '%s\\n' {source} > Solution.java && javac Solution.java && java Solution"
        ),
    }
}
