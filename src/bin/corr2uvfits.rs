// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use corr2uvfits::cli::main_with_args;
use std::env;

fn main() {
    let retcode = main_with_args(env::args());
    std::process::exit(retcode);
}
