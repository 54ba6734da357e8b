/// A request ferry forwards: `GET http://<host>/ HTTP/1.0` and a blank line
pub fn http_request<S: AsRef<str>>(host: S) -> String {
    format!("GET http://{}/ HTTP/1.0\r\n\r\n", host.as_ref())
}

/// Any request line, forwarded or not
pub fn raw_request<S1: AsRef<str>, S2: AsRef<str>, S3: AsRef<str>>(
    method: S1,
    target: S2,
    version: S3,
) -> String {
    format!(
        "{} {} {}\r\n\r\n",
        method.as_ref(),
        target.as_ref(),
        version.as_ref()
    )
}

/// A response whose body ends with a closing html tag, as ferry expects
pub fn html_response<S: AsRef<str>>(content: S) -> String {
    let body = format!("<html>{}</html>", content.as_ref());
    format!(
        "HTTP/1.0 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
}
