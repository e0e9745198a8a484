use std::env;
use std::ffi::OsStr;
use std::path::Path;

use pharaoh::environment::{Environment, BUS_ADDRESS};

#[test]
fn host_bus_is_never_inherited() {
    let env = Environment::from_parent([(BUS_ADDRESS, "unix:path=/run/user/1000/bus"), ("A", "1")]);

    assert_eq!(env.get(BUS_ADDRESS), None);
    assert_eq!(env.get("A"), Some(OsStr::new("1")));
}

#[test]
fn bus_socket_rewrite() {
    let mut env = Environment::from_parent([(BUS_ADDRESS, "unix:path=/run/user/1000/bus")]);
    env.set_bus_socket(Path::new("/run/user/1000/bus"));

    assert_eq!(env.get(BUS_ADDRESS), Some(OsStr::new("unix:path=/run/user/1000/bus")));
}

#[test]
fn prepend_search_path() {
    let mut env = Environment::from_parent([("PATH", "/usr/bin"), ("LD_LIBRARY_PATH", "")]);
    env.prepend_path("PATH", Path::new("/opt/app/usr/bin"));
    env.prepend_path("LD_LIBRARY_PATH", Path::new("/opt/app/usr/lib"));
    env.prepend_path("MISSING", Path::new("/opt/app"));

    assert_eq!(env.get("PATH"), Some(OsStr::new("/opt/app/usr/bin:/usr/bin")));
    assert_eq!(env.get("LD_LIBRARY_PATH"), Some(OsStr::new("/opt/app/usr/lib")));
    assert_eq!(env.get("MISSING"), Some(OsStr::new("/opt/app")));
}

#[test]
fn parent_environment_untouched() {
    let before: Vec<_> = env::vars_os().collect();

    let mut child = Environment::from_parent(env::vars_os());
    child.set("PHARAOH_APP_ID", "org.example.App");
    child.set_bus_socket(Path::new("/run/user/1000/bus"));

    let after: Vec<_> = env::vars_os().collect();
    assert_eq!(before, after);
    assert_eq!(env::var_os("PHARAOH_APP_ID"), None);
}
